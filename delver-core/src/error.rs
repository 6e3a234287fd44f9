//! Error types for the delver research pipeline.
//!
//! Uses `thiserror` for public API error types. The taxonomy separates
//! fatal run-level failures (planning, coverage, synthesis) from
//! per-directive search failures, which are recorded rather than thrown.

use uuid::Uuid;

/// Top-level error type for a research run.
#[derive(Debug, thiserror::Error)]
pub enum DelverError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error(
        "insufficient coverage: {succeeded} of {planned} directives succeeded \
         (failed: {failed_ids:?})"
    )]
    InsufficientCoverage {
        succeeded: usize,
        planned: usize,
        failed_ids: Vec<Uuid>,
    },

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("run was cancelled")]
    Cancelled,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the planning stage. All fatal: the run aborts before any
/// search spend.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("model backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("plan has {got} directives after deduplication, need at least {min}")]
    TooFewDirectives { got: usize, min: usize },

    #[error("topic is empty")]
    EmptyTopic,
}

/// A per-directive search failure, produced after retries are exhausted.
///
/// Caught and recorded at the executor boundary; never aborts sibling
/// directives.
#[derive(Debug, Clone, thiserror::Error)]
#[error("search for directive {directive_id} failed after {attempts} attempts: {kind}")]
pub struct SearchFailure {
    pub directive_id: Uuid,
    pub attempts: u32,
    pub kind: SearchErrorKind,
}

/// Failure modes of a single search provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchErrorKind {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("rate limited by provider{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("authentication rejected by provider")]
    AuthRejected,
}

impl SearchErrorKind {
    /// Transient failures are retried with backoff; auth rejection is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SearchErrorKind::AuthRejected)
    }
}

/// Errors from the synthesis stage. Fatal: a report missing a mandatory
/// section or citing a fabricated source is never returned.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("model backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("report is missing mandatory section '{heading}'")]
    MissingSection { heading: String },

    #[error("report cites source [{index}] which does not exist")]
    FabricatedCitation { index: usize },
}

/// Errors from the model backend collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("API request failed: {message}")]
    Api { message: String },

    #[error("response parse error: {message}")]
    Parse { message: String },

    #[error("authentication failed for backend {backend}")]
    AuthFailed { backend: String },

    #[error("rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("backend connection failed: {message}")]
    Connection { message: String },
}

impl BackendError {
    /// Check if the error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. }
                | BackendError::Timeout { .. }
                | BackendError::Connection { .. }
        )
    }
}

/// Errors from the persistent result cache.
///
/// A corrupt entry is surfaced as a miss, not an error; these variants
/// cover the store itself being unusable.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to create cache directory {dir}: {source}")]
    CreateDir {
        dir: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write cache entry {key}: {source}")]
    Write {
        key: String,
        source: std::io::Error,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DelverError`.
pub type Result<T> = std::result::Result<T, DelverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_planning() {
        let err = DelverError::Planning(PlanningError::TooFewDirectives { got: 7, min: 10 });
        assert_eq!(
            err.to_string(),
            "planning failed: plan has 7 directives after deduplication, need at least 10"
        );
    }

    #[test]
    fn test_search_failure_display() {
        let id = Uuid::nil();
        let err = SearchFailure {
            directive_id: id,
            attempts: 3,
            kind: SearchErrorKind::Timeout { timeout_secs: 15 },
        };
        assert_eq!(
            err.to_string(),
            format!("search for directive {id} failed after 3 attempts: request timed out after 15s")
        );
    }

    #[test]
    fn test_search_error_retryability() {
        assert!(SearchErrorKind::Timeout { timeout_secs: 10 }.is_retryable());
        assert!(
            SearchErrorKind::RateLimited {
                retry_after_secs: Some(5)
            }
            .is_retryable()
        );
        assert!(
            SearchErrorKind::Provider {
                message: "503".into()
            }
            .is_retryable()
        );
        assert!(!SearchErrorKind::AuthRejected.is_retryable());
    }

    #[test]
    fn test_backend_error_retryability() {
        assert!(BackendError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(BackendError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(
            !BackendError::AuthFailed {
                backend: "openai".into()
            }
            .is_retryable()
        );
        assert!(
            !BackendError::Parse {
                message: "bad json".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_insufficient_coverage_display() {
        let err = DelverError::InsufficientCoverage {
            succeeded: 5,
            planned: 12,
            failed_ids: vec![],
        };
        assert!(err.to_string().contains("5 of 12"));
    }

    #[test]
    fn test_synthesis_error_display() {
        let err = SynthesisError::MissingSection {
            heading: "Mechanism".into(),
        };
        assert_eq!(
            err.to_string(),
            "report is missing mandatory section 'Mechanism'"
        );

        let err = SynthesisError::FabricatedCitation { index: 9 };
        assert_eq!(err.to_string(), "report cites source [9] which does not exist");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DelverError = io_err.into();
        assert!(matches!(err, DelverError::Io(_)));
    }
}
