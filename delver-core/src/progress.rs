//! Progress events for the presentation layer.
//!
//! The observer is informational only: the pipeline runs headless and
//! never depends on an observer's behavior. Implementations must be cheap
//! and non-blocking; they are called from the executor's settle loop.

use crate::error::SearchFailure;
use crate::types::{Report, SearchPlan};
use uuid::Uuid;

/// How a single directive settled.
#[derive(Debug, Clone)]
pub enum DirectiveOutcome {
    /// The directive resolved with this many raw results.
    Resolved { results: usize },
    /// The directive failed after retries.
    Failed { failure: SearchFailure },
}

impl DirectiveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DirectiveOutcome::Resolved { .. })
    }
}

/// Observer interface for pipeline progress.
pub trait PipelineObserver: Send + Sync {
    /// The plan was generated and validated.
    fn on_plan_ready(&self, _plan: &SearchPlan) {}
    /// One directive's search settled (success or failure).
    fn on_directive_resolved(&self, _directive_id: Uuid, _outcome: &DirectiveOutcome) {}
    /// The final report was synthesized.
    fn on_report_ready(&self, _report: &Report) {}
}

/// Observer that ignores every event.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success_flag() {
        let ok = DirectiveOutcome::Resolved { results: 5 };
        assert!(ok.is_success());

        let failed = DirectiveOutcome::Failed {
            failure: SearchFailure {
                directive_id: Uuid::new_v4(),
                attempts: 4,
                kind: crate::error::SearchErrorKind::Timeout { timeout_secs: 15 },
            },
        };
        assert!(!failed.is_success());
    }
}
