//! Streaming completion clients.
//!
//! A [`GenerationClient`] turns one prompt into a finite, non-restartable
//! stream of text deltas. The stream is lazy: bytes are read from the
//! connection only as the consumer polls, so dropping the stream abandons
//! the remaining response.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Stream of generated text fragments.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub model: String,
}

/// Submits prompts to a completion endpoint.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start a streamed completion.
    ///
    /// Connection failures and non-success statuses are returned here; errors
    /// after the first byte arrive as an `Err` item in the stream.
    async fn stream_completion(&self, request: GenerationRequest)
    -> Result<FragmentStream, LlmError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (LM Studio,
/// llama.cpp server, vLLM, OpenAI itself).
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Build a client from config; the API key is read from `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatibleClient {
    async fn stream_completion(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, LlmError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        debug!(model = request.model.as_str(), url = %self.endpoint(), "Sending streaming completion request");

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            error!(error = %e, "Completion endpoint unreachable");
            LlmError::Connection {
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Completion endpoint returned an error status");
            return Err(LlmError::ApiRequest {
                status: status.as_u16(),
                message: truncate(&text, 200),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(decode_event_stream(bytes))
    }
}

/// What one response line means.
#[derive(Debug, PartialEq)]
enum LineEvent {
    Skip,
    Done,
    Delta(String),
}

fn parse_line(raw: &[u8]) -> LineEvent {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return LineEvent::Skip;
    }
    let payload = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if payload == "[DONE]" {
        return LineEvent::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => LineEvent::Delta(content.to_string()),
            _ => LineEvent::Skip,
        },
        Err(e) => {
            warn!(error = %e, data_preview = %truncate(payload, 200), "Skipping undecodable stream line");
            LineEvent::Skip
        }
    }
}

struct DecodeState<E> {
    bytes: BoxStream<'static, Result<Vec<u8>, E>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl<E> DecodeState<E> {
    /// Move every complete line out of the buffer. Returns true on `[DONE]`.
    fn drain_lines(&mut self) -> bool {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.handle(&line) {
                return true;
            }
        }
        false
    }

    fn handle(&mut self, line: &[u8]) -> bool {
        match parse_line(line) {
            LineEvent::Skip => false,
            LineEvent::Done => true,
            LineEvent::Delta(text) => {
                self.pending.push_back(text);
                false
            }
        }
    }
}

/// Decode a raw byte stream of (optionally `data: `-prefixed) JSON lines into
/// text deltas. Lines are split on raw bytes so multi-byte characters cut
/// across network chunks survive intact.
pub(crate) fn decode_event_stream<E>(bytes: BoxStream<'static, Result<Vec<u8>, E>>) -> FragmentStream
where
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    if state.drain_lines() {
                        state.finished = true;
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((
                        Err(LlmError::Streaming {
                            message: format!("Failed to read streaming chunk: {e}"),
                        }),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle(&rest);
                }
            }
        }
    })
    .boxed()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// How a [`ScriptedClient`] ends its response.
#[derive(Debug, Clone)]
enum Ending {
    Clean,
    StreamError(String),
    Rejected { status: u16, message: String },
}

/// In-process client replaying a fixed script; used for tests and dry runs.
#[derive(Debug)]
pub struct ScriptedClient {
    fragments: Vec<String>,
    ending: Ending,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    /// Yield `fragments` in order, then end cleanly.
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: Ending::Clean,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Yield `fragments`, then fail mid-stream with `message`.
    pub fn failing_after<I, S>(fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ending: Ending::StreamError(message.into()),
            ..Self::new(fragments)
        }
    }

    /// Reject every request with the given HTTP status.
    pub fn rejecting(status: u16, message: impl Into<String>) -> Self {
        Self {
            ending: Ending::Rejected {
                status,
                message: message.into(),
            },
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn stream_completion(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, LlmError> {
        match self.requests.lock() {
            Ok(mut guard) => guard.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        let mut items: Vec<Result<String, LlmError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        match &self.ending {
            Ending::Clean => {}
            Ending::StreamError(message) => items.push(Err(LlmError::Streaming {
                message: message.clone(),
            })),
            Ending::Rejected { status, message } => {
                return Err(LlmError::ApiRequest {
                    status: *status,
                    message: message.clone(),
                });
            }
        }
        Ok(stream::iter(items).boxed())
    }
}
