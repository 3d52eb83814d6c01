//! Property-based tests for ranking and namespace isolation using proptest.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use scenarist_core::embeddings::cosine_similarity;
use scenarist_core::{
    DocumentChunk, Embedder, IndexManager, LocalEmbedder, MmrReranker, Namespace, TaskId,
};

fn vectors(max: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 0..max)
}

fn query() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, 4)
}

// --- MMR properties ---

proptest! {
    #[test]
    fn mmr_returns_min_k_n_distinct_indices(
        candidates in vectors(16),
        q in query(),
        k in 0usize..20,
        lambda in 0.0f32..=1.0,
    ) {
        let picked = MmrReranker::new(lambda).select(&q, &candidates, k);
        prop_assert_eq!(picked.len(), k.min(candidates.len()));
        let unique: HashSet<_> = picked.iter().collect();
        prop_assert_eq!(unique.len(), picked.len());
        prop_assert!(picked.iter().all(|&i| i < candidates.len()));
    }

    #[test]
    fn mmr_pure_relevance_is_sorted_by_relevance(
        candidates in vectors(16),
        q in query(),
    ) {
        let picked = MmrReranker::new(1.0).select(&q, &candidates, candidates.len());

        let relevance: Vec<f32> = candidates.iter().map(|v| cosine_similarity(&q, v)).collect();
        let mut expected: Vec<usize> = (0..candidates.len()).collect();
        expected.sort_by(|&a, &b| relevance[b].partial_cmp(&relevance[a]).unwrap());

        prop_assert_eq!(picked, expected);
    }

    #[test]
    fn mmr_pure_diversity_maximizes_min_dissimilarity(
        candidates in vectors(12),
        q in query(),
    ) {
        let picked = MmrReranker::new(0.0).select(&q, &candidates, candidates.len());

        for step in 1..picked.len() {
            let selected = &picked[..step];
            let dissimilarity = |i: usize| {
                1.0 - selected
                    .iter()
                    .map(|&s| cosine_similarity(&candidates[i], &candidates[s]))
                    .fold(f32::NEG_INFINITY, f32::max)
            };
            let chosen = dissimilarity(picked[step]);
            for i in (0..candidates.len()).filter(|i| !selected.contains(i)) {
                prop_assert!(chosen + 1e-6 >= dissimilarity(i));
            }
        }
    }
}

// --- Namespace isolation ---

fn chunk(content: String, embedding: Vec<f32>, task: TaskId) -> DocumentChunk {
    DocumentChunk {
        content,
        metadata: BTreeMap::new(),
        embedding,
        document_id: "doc".into(),
        task_id: Some(task),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn search_never_crosses_namespaces(
        a_docs in prop::collection::vec("[a-z]{1,8}( [a-z]{1,8}){0,5}", 1..6),
        b_docs in prop::collection::vec("[a-z]{1,8}( [a-z]{1,8}){0,5}", 0..6),
        q in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
    ) {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path());
        let embedder = Arc::new(LocalEmbedder::new(32));

        let hits = tokio_test::block_on(async {
            let a = manager.open(Namespace::Task(TaskId(1))).unwrap();
            let b = manager.open(Namespace::Task(TaskId(2))).unwrap();

            let mut a_chunks = Vec::new();
            for text in &a_docs {
                let v = embedder.embed(text).await.unwrap();
                a_chunks.push(chunk(format!("A:{text}"), v, TaskId(1)));
            }
            a.add(a_chunks).await.unwrap();

            let mut b_chunks = Vec::new();
            for text in &b_docs {
                let v = embedder.embed(text).await.unwrap();
                b_chunks.push(chunk(format!("B:{text}"), v, TaskId(2)));
            }
            b.add(b_chunks).await.unwrap();

            b.search(embedder.as_ref(), &q, 10).await.hits
        });

        prop_assert!(hits.len() <= b_docs.len());
        for hit in &hits {
            prop_assert!(hit.chunk.content.starts_with("B:"));
            prop_assert_eq!(hit.chunk.task_id, Some(TaskId(2)));
        }
    }
}
