//! Model backend abstraction.
//!
//! The pipeline treats the language model as a black-box structured-output
//! service: a prompt goes in, a JSON payload comes out. The trait stays
//! object-safe by returning the raw payload; `complete_structured` parses
//! it into the stage's draft type at the call site. Backends are fallible,
//! latency-bearing, and non-deterministic; callers never assume repeat
//! calls agree.

pub mod openai;

use crate::error::BackendError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

pub use openai::OpenAiCompatibleBackend;

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// System instructions framing the task.
    pub system: String,
    /// The user prompt.
    pub prompt: String,
    /// Maximum completion tokens.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Trait for model backends producing structured (JSON) completions.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one completion and return the raw JSON payload.
    async fn complete(&self, request: StructuredRequest) -> Result<String, BackendError>;

    /// Backend/model name, for logging.
    fn name(&self) -> &str;
}

/// Run a completion and parse the payload into `T`.
///
/// Tolerates models that wrap JSON in a Markdown code fence.
pub async fn complete_structured<T: DeserializeOwned>(
    backend: &Arc<dyn ModelBackend>,
    request: StructuredRequest,
) -> Result<T, BackendError> {
    let raw = backend.complete(request).await?;
    let payload = strip_code_fence(&raw);
    debug!(backend = backend.name(), bytes = payload.len(), "Parsing structured output");
    serde_json::from_str(payload).map_err(|e| BackendError::Parse {
        message: format!("structured output did not match schema: {e}"),
    })
}

/// Strip a surrounding ```json ... ``` fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// A scripted model backend for tests: returns queued responses in order.
pub struct MockModelBackend {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<String, BackendError>>>,
    calls: std::sync::atomic::AtomicU64,
}

impl MockModelBackend {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Create a backend that always returns the given payload.
    ///
    /// Queues multiple copies so it can serve repeated calls.
    pub fn with_response(payload: &str) -> Self {
        let backend = Self::new();
        for _ in 0..50 {
            backend.queue_ok(payload);
        }
        backend
    }

    /// Queue a successful payload for the next `complete` call.
    pub fn queue_ok(&self, payload: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(payload.to_string()));
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_err(&self, err: BackendError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// Number of `complete` invocations so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockModelBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    async fn complete(&self, _request: StructuredRequest) -> Result<String, BackendError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(BackendError::Api {
                    message: "mock backend has no queued responses".into(),
                })
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Draft {
        value: u32,
    }

    fn request() -> StructuredRequest {
        StructuredRequest {
            system: "sys".into(),
            prompt: "prompt".into(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_complete_structured_parses() {
        let backend: Arc<dyn ModelBackend> =
            Arc::new(MockModelBackend::with_response(r#"{"value": 7}"#));
        let draft: Draft = complete_structured(&backend, request()).await.unwrap();
        assert_eq!(draft, Draft { value: 7 });
    }

    #[tokio::test]
    async fn test_complete_structured_strips_code_fence() {
        let backend: Arc<dyn ModelBackend> = Arc::new(MockModelBackend::with_response(
            "```json\n{\"value\": 3}\n```",
        ));
        let draft: Draft = complete_structured(&backend, request()).await.unwrap();
        assert_eq!(draft.value, 3);
    }

    #[tokio::test]
    async fn test_complete_structured_parse_error() {
        let backend: Arc<dyn ModelBackend> =
            Arc::new(MockModelBackend::with_response("not json at all"));
        let result: Result<Draft, _> = complete_structured(&backend, request()).await;
        assert!(matches!(result, Err(BackendError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_mock_queue_order_and_errors() {
        let mock = MockModelBackend::new();
        mock.queue_ok(r#"{"value": 1}"#);
        mock.queue_err(BackendError::Timeout { timeout_secs: 60 });
        let backend: Arc<dyn ModelBackend> = Arc::new(mock);

        let first: Draft = complete_structured(&backend, request()).await.unwrap();
        assert_eq!(first.value, 1);
        let second: Result<Draft, _> = complete_structured(&backend, request()).await;
        assert!(matches!(second, Err(BackendError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_exhausted_queue_errors() {
        let backend: Arc<dyn ModelBackend> = Arc::new(MockModelBackend::new());
        let result: Result<Draft, _> = complete_structured(&backend, request()).await;
        assert!(matches!(result, Err(BackendError::Api { .. })));
    }

    #[test]
    fn test_strip_code_fence_plain() {
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_strip_code_fence_unlabelled() {
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
