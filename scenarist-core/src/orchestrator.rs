//! Retrieval-augmented scenario generation.
//!
//! [`ScenarioGenerator::generate_stream`] runs one request end to end:
//! search the namespace, rerank with MMR, render the context block, compose
//! the prompt, stream the completion, then validate the accumulated text and
//! emit a statistics event. Every fragment is yielded as soon as it arrives;
//! a consumer that stops polling abandons the rest of the response.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::context::format_context;
use crate::embeddings::Embedder;
use crate::generation::{FragmentStream, GenerationClient, GenerationRequest};
use crate::grounding::{ContextValidator, ValidationReport};
use crate::history::ScenarioRecord;
use crate::index::{NamespaceStore, RetrievalStatus};
use crate::rerank::MmrReranker;
use crate::settings::RuntimeSettings;
use crate::types::{ScoredChunk, TaskId};

/// One unit yielded by a generation request.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// A delta of generated text.
    Fragment(String),
    /// Final event of a cleanly finished request.
    Statistics(GenerationStats),
    /// Terminal failure; nothing follows.
    Error(String),
}

/// Figures reported after a clean generation.
#[derive(Debug, Clone)]
pub struct GenerationStats {
    /// Whitespace word count of the composed prompt.
    pub input_tokens: usize,
    /// Whitespace word count of the generated text.
    pub output_tokens: usize,
    pub elapsed: Duration,
    pub retrieved_contexts: usize,
    pub retrieval_status: RetrievalStatus,
    pub validation: ValidationReport,
}

impl fmt::Display for GenerationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n\nInference Statistics:\nInput Tokens: {}\nOutput Tokens: {}\nGeneration Time: {:.2} seconds\nRetrieved Contexts: {}\nContext Validation: {}",
            self.input_tokens,
            self.output_tokens,
            self.elapsed.as_secs_f64(),
            self.retrieved_contexts,
            self.validation.message,
        )?;
        if let RetrievalStatus::Degraded { reason } = &self.retrieval_status {
            write!(f, "\nRetrieval: degraded ({reason})")?;
        }
        if !self.validation.passed {
            write!(
                f,
                "\n\nWARNING: The generated scenario may not sufficiently incorporate the provided context documents. Please review and regenerate if necessary."
            )?;
        }
        Ok(())
    }
}

/// Composes retrieval, ranking, prompting, streaming and validation.
pub struct ScenarioGenerator {
    store: Arc<NamespaceStore>,
    embedder: Arc<dyn Embedder>,
    client: Arc<dyn GenerationClient>,
    settings: Arc<RuntimeSettings>,
    validator: ContextValidator,
    model: String,
}

impl ScenarioGenerator {
    pub fn new(
        store: Arc<NamespaceStore>,
        embedder: Arc<dyn Embedder>,
        client: Arc<dyn GenerationClient>,
        settings: Arc<RuntimeSettings>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            client,
            settings,
            validator: ContextValidator::default(),
            model: model.into(),
        }
    }

    pub fn with_validator(mut self, validator: ContextValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Run one generation request as a lazy event stream.
    ///
    /// Settings are read once when the stream is first polled. The stream
    /// ends with exactly one `Statistics` or `Error` event.
    pub fn generate_stream(&self, criteria: impl Into<String>) -> BoxStream<'static, GenerationEvent> {
        let run = Run {
            request: Request {
                store: Arc::clone(&self.store),
                embedder: Arc::clone(&self.embedder),
                client: Arc::clone(&self.client),
                settings: Arc::clone(&self.settings),
                validator: self.validator.clone(),
                model: self.model.clone(),
                criteria: criteria.into(),
            },
            phase: Phase::Start,
        };
        stream::unfold(run, |mut run| async move {
            let event = run.step().await?;
            Some((event, run))
        })
        .boxed()
    }
}

enum Phase {
    Start,
    Streaming(Box<Streaming>),
    Finished,
}

struct Streaming {
    fragments: FragmentStream,
    started: Instant,
    input_tokens: usize,
    retrieval_status: RetrievalStatus,
    retrieved: Vec<ScoredChunk>,
    output: String,
}

/// Immutable inputs of one request. Kept apart from [`Phase`] so it can be
/// borrowed across awaits while the fragment stream (not `Sync`) is held.
struct Request {
    store: Arc<NamespaceStore>,
    embedder: Arc<dyn Embedder>,
    client: Arc<dyn GenerationClient>,
    settings: Arc<RuntimeSettings>,
    validator: ContextValidator,
    model: String,
    criteria: String,
}

struct Run {
    request: Request,
    phase: Phase,
}

impl Run {
    async fn step(&mut self) -> Option<GenerationEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Start => match self.request.begin().await {
                    Ok(streaming) => self.phase = Phase::Streaming(Box::new(streaming)),
                    Err(message) => return Some(GenerationEvent::Error(message)),
                },
                Phase::Streaming(mut streaming) => {
                    return match streaming.fragments.next().await {
                        Some(Ok(fragment)) => {
                            streaming.output.push_str(&fragment);
                            self.phase = Phase::Streaming(streaming);
                            Some(GenerationEvent::Fragment(fragment))
                        }
                        Some(Err(e)) => {
                            error!(namespace = %self.request.store.namespace(), error = %e, "Generation stream failed");
                            Some(GenerationEvent::Error(format!("Error generating scenario: {e}")))
                        }
                        None => Some(GenerationEvent::Statistics(self.request.finish(*streaming))),
                    };
                }
                Phase::Finished => return None,
            }
        }
    }
}

impl Request {
    async fn begin(&self) -> Result<Streaming, String> {
        let snapshot = self.settings.snapshot();
        let started = Instant::now();

        let retrieval = self
            .store
            .search(self.embedder.as_ref(), &self.criteria, snapshot.max_relevant_chunks)
            .await;
        let reranker = MmrReranker::new(snapshot.diversity_lambda);
        let retrieved = reranker.rerank(
            &retrieval.query_vector,
            retrieval.hits,
            snapshot.max_relevant_chunks,
        );
        debug!(
            namespace = %self.store.namespace(),
            retrieved = retrieved.len(),
            "Context selected"
        );

        let context = format_context(&retrieved);
        let prompt = snapshot.compose_prompt(&context, &self.criteria);
        let input_tokens = word_count(&prompt);

        let request = GenerationRequest {
            prompt,
            max_tokens: snapshot.max_tokens,
            model: self.model.clone(),
        };
        match self.client.stream_completion(request).await {
            Ok(fragments) => Ok(Streaming {
                fragments,
                started,
                input_tokens,
                retrieval_status: retrieval.status,
                retrieved,
                output: String::new(),
            }),
            Err(e) => {
                error!(namespace = %self.store.namespace(), error = %e, "Generation request failed");
                Err(format!("Error generating scenario: {e}"))
            }
        }
    }

    fn finish(&self, streaming: Streaming) -> GenerationStats {
        let validation = self.validator.validate(&streaming.output, &streaming.retrieved);
        if !validation.passed {
            warn!(
                namespace = %self.store.namespace(),
                coverage = validation.coverage_ratio,
                "Generated scenario failed context validation"
            );
        }
        let stats = GenerationStats {
            input_tokens: streaming.input_tokens,
            output_tokens: word_count(&streaming.output),
            elapsed: streaming.started.elapsed(),
            retrieved_contexts: streaming.retrieved.len(),
            retrieval_status: streaming.retrieval_status,
            validation,
        };
        info!(
            namespace = %self.store.namespace(),
            input_tokens = stats.input_tokens,
            output_tokens = stats.output_tokens,
            retrieved = stats.retrieved_contexts,
            "Generation complete"
        );
        stats
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Accumulates one request's events and decides whether it produced a
/// complete, saveable scenario.
#[derive(Debug, Default)]
pub struct GenerationSession {
    text: String,
    statistics: Option<GenerationStats>,
    failed: bool,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &GenerationEvent) {
        match event {
            GenerationEvent::Fragment(fragment) => self.text.push_str(fragment),
            GenerationEvent::Statistics(stats) => self.statistics = Some(stats.clone()),
            GenerationEvent::Error(_) => self.failed = true,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn statistics(&self) -> Option<&GenerationStats> {
        self.statistics.as_ref()
    }

    /// True only when the stream ended with statistics and no error.
    pub fn is_complete(&self) -> bool {
        !self.failed && self.statistics.is_some()
    }

    /// Build a history record if the session completed with non-empty text.
    pub fn into_record(
        self,
        task_id: TaskId,
        name: impl Into<String>,
        criteria: impl Into<String>,
        uploaded_files: Vec<String>,
    ) -> Option<ScenarioRecord> {
        if !self.is_complete() || self.text.trim().is_empty() {
            return None;
        }
        let statistics = self.statistics?;
        Some(ScenarioRecord::new(
            task_id,
            name,
            criteria,
            self.text,
            statistics.to_string(),
            uploaded_files,
        ))
    }
}
