//! Maximal Marginal Relevance (MMR) selection.
//!
//! Picks an ordered subset of candidates balancing relevance to the query
//! against redundancy with what has already been picked:
//!
//! `mmr(i) = λ · relevance(i) + (1 − λ) · (1 − max sim(i, selected))`
//!
//! λ = 1.0 ranks purely by relevance; λ = 0.0 picks (after the first, most
//! relevant candidate) whatever is least similar to the selection so far.

use crate::embeddings::cosine_similarity;
use crate::types::ScoredChunk;

/// Diversity-aware reranker.
#[derive(Debug, Clone, Copy)]
pub struct MmrReranker {
    pub lambda: f32,
}

impl Default for MmrReranker {
    fn default() -> Self {
        Self { lambda: 0.5 }
    }
}

impl MmrReranker {
    /// Create a reranker; λ is clamped to `[0, 1]`.
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    /// Select up to `k` candidate indices in presentation order.
    ///
    /// Ties go to the lowest index. Zero-magnitude vectors have similarity
    /// 0.0 to everything.
    pub fn select(&self, query: &[f32], candidates: &[Vec<f32>], k: usize) -> Vec<usize> {
        let k = k.min(candidates.len());
        if k == 0 {
            return Vec::new();
        }

        let relevance: Vec<f32> = candidates
            .iter()
            .map(|v| cosine_similarity(query, v))
            .collect();

        let mut picked = vec![false; candidates.len()];
        // Highest similarity of each candidate to anything selected so far.
        let mut max_sim = vec![f32::NEG_INFINITY; candidates.len()];
        let mut selected = Vec::with_capacity(k);

        let first = argmax(relevance.iter().copied().enumerate());
        if let Some(first) = first {
            self.mark(first, candidates, &mut picked, &mut max_sim, &mut selected);
        }

        while selected.len() < k {
            let lambda = self.lambda;
            let scores = (0..candidates.len())
                .filter(|&i| !picked[i])
                .map(|i| (i, lambda * relevance[i] + (1.0 - lambda) * (1.0 - max_sim[i])));
            match argmax(scores) {
                Some(best) => self.mark(best, candidates, &mut picked, &mut max_sim, &mut selected),
                None => break,
            }
        }

        selected
    }

    /// Rerank retrieved hits by their stored embeddings, keeping at most `k`.
    pub fn rerank(&self, query: &[f32], hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
        let vectors: Vec<Vec<f32>> = hits.iter().map(|h| h.chunk.embedding.clone()).collect();
        let order = self.select(query, &vectors, k);
        let mut slots: Vec<Option<ScoredChunk>> = hits.into_iter().map(Some).collect();
        order.into_iter().filter_map(|i| slots[i].take()).collect()
    }

    fn mark(
        &self,
        index: usize,
        candidates: &[Vec<f32>],
        picked: &mut [bool],
        max_sim: &mut [f32],
        selected: &mut Vec<usize>,
    ) {
        picked[index] = true;
        selected.push(index);
        for (i, v) in candidates.iter().enumerate() {
            if !picked[i] {
                let sim = cosine_similarity(v, &candidates[index]);
                if sim > max_sim[i] {
                    max_sim[i] = sim;
                }
            }
        }
    }
}

/// Index of the largest score; the first one wins ties. NaN ranks below
/// every real score, so it is only chosen when nothing else remains.
fn argmax(scores: impl Iterator<Item = (usize, f32)>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, score) in scores {
        let score = if score.is_nan() { f32::NEG_INFINITY } else { score };
        match best {
            None => best = Some((i, score)),
            Some((_, top)) if score > top => best = Some((i, score)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentChunk;
    use std::collections::BTreeMap;

    #[test]
    fn test_empty_candidates() {
        let mmr = MmrReranker::default();
        assert!(mmr.select(&[1.0, 0.0], &[], 5).is_empty());
        assert!(mmr.select(&[1.0, 0.0], &[vec![1.0, 0.0]], 0).is_empty());
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let mmr = MmrReranker::new(0.0);
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![0.7, 0.7]];
        assert_eq!(mmr.select(&[1.0, 0.0], &candidates, 1), vec![1]);
    }

    #[test]
    fn test_pure_relevance_matches_sort() {
        let mmr = MmrReranker::new(1.0);
        let candidates = vec![
            vec![0.2, 1.0],
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.5, 0.5],
        ];
        assert_eq!(mmr.select(&[1.0, 0.0], &candidates, 4), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_diversity_skips_near_duplicate() {
        let mmr = MmrReranker::new(0.3);
        let candidates = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.01, 0.0],
            vec![0.6, 0.0, 0.8],
        ];
        let order = mmr.select(&[1.0, 0.0, 0.0], &candidates, 2);
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_ties_pick_lowest_index() {
        let mmr = MmrReranker::new(0.5);
        let candidates = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        assert_eq!(mmr.select(&[1.0, 0.0], &candidates, 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_vectors_do_not_poison_selection() {
        let mmr = MmrReranker::new(0.5);
        let candidates = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0]];
        let order = mmr.select(&[0.0, 0.0], &candidates, 3);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], 0);
    }

    #[test]
    fn test_nan_scores_rank_last() {
        let scores = [(0, f32::NAN), (1, 0.2), (2, 0.7), (3, f32::NAN)];
        assert_eq!(argmax(scores.into_iter()), Some(2));
        assert_eq!(argmax([(4, f32::NAN), (5, f32::NAN)].into_iter()), Some(4));
        assert_eq!(argmax(std::iter::empty()), None);
    }

    #[test]
    fn test_nan_candidate_is_picked_after_real_ones() {
        let candidates = vec![vec![f32::NAN, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let picked = MmrReranker::new(1.0).select(&[1.0, 0.0], &candidates, 3);
        assert_eq!(picked, vec![1, 2, 0]);
    }

    #[test]
    fn test_lambda_is_clamped() {
        assert_eq!(MmrReranker::new(3.0).lambda, 1.0);
        assert_eq!(MmrReranker::new(-1.0).lambda, 0.0);
    }

    #[test]
    fn test_rerank_reorders_hits() {
        let hit = |content: &str, embedding: Vec<f32>, score: f32| ScoredChunk {
            chunk: DocumentChunk {
                content: content.into(),
                metadata: BTreeMap::new(),
                embedding,
                document_id: "d".into(),
                task_id: None,
            },
            score,
        };
        let hits = vec![
            hit("a", vec![1.0, 0.0], 1.0),
            hit("a-copy", vec![1.0, 0.0], 1.0),
            hit("b", vec![0.0, 1.0], 0.0),
        ];
        let out = MmrReranker::new(0.2).rerank(&[1.0, 0.0], hits, 2);
        let contents: Vec<_> = out.iter().map(|h| h.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }
}
