//! Concurrent search execution with a join barrier.
//!
//! Every directive is dispatched against the gateway as its own task,
//! bounded by a semaphore. The executor waits for all tasks to settle
//! before returning; one directive's failure never aborts its siblings.
//! Partial success is success: the minimum-success threshold is the
//! pipeline driver's decision, not the executor's.

use crate::error::SearchFailure;
use crate::progress::{DirectiveOutcome, PipelineObserver};
use crate::search::SearchGateway;
use crate::types::{RawResult, SearchPlan};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settled search outcomes, keyed by directive id. Arrival order carries
/// no meaning; downstream stages iterate the plan, not this map.
pub type DirectiveResults = HashMap<Uuid, Result<Vec<RawResult>, SearchFailure>>;

/// Dispatches a plan's directives concurrently against the search gateway.
pub struct SearchExecutor {
    gateway: Arc<SearchGateway>,
    max_in_flight: usize,
}

impl SearchExecutor {
    /// Create an executor with the given in-flight bound.
    pub fn new(gateway: Arc<SearchGateway>, max_in_flight: usize) -> Self {
        Self {
            gateway,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Execute every directive and wait for all of them to settle.
    ///
    /// On cancellation, in-flight searches are abandoned and only the
    /// already-settled outcomes are returned; the caller decides how to
    /// surface the cancellation.
    pub async fn execute(
        &self,
        plan: &SearchPlan,
        observer: Arc<dyn PipelineObserver>,
        cancel: &CancellationToken,
    ) -> DirectiveResults {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks: JoinSet<(Uuid, Result<Vec<RawResult>, SearchFailure>)> = JoinSet::new();

        for directive in &plan.directives {
            let gateway = self.gateway.clone();
            let semaphore = semaphore.clone();
            let directive = directive.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // Semaphore only closes if the executor is torn down.
                    return (
                        directive.id,
                        Err(SearchFailure {
                            directive_id: directive.id,
                            attempts: 0,
                            kind: crate::error::SearchErrorKind::Provider {
                                message: "executor shut down".into(),
                            },
                        }),
                    );
                };
                let result = gateway.search(&directive).await;
                (directive.id, result)
            });
        }

        let mut results: DirectiveResults = HashMap::with_capacity(plan.len());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(settled = results.len(), planned = plan.len(), "Cancellation requested, abandoning in-flight searches");
                    tasks.abort_all();
                    // Drain so aborted tasks are reaped; late completions
                    // that raced the abort are still recorded.
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((id, result)) = joined {
                            results.insert(id, result);
                        }
                    }
                    break;
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((id, result)) => {
                            let outcome = match &result {
                                Ok(raw) => DirectiveOutcome::Resolved { results: raw.len() },
                                Err(failure) => DirectiveOutcome::Failed {
                                    failure: failure.clone(),
                                },
                            };
                            debug!(directive = %id, success = outcome.is_success(), "Directive settled");
                            observer.on_directive_resolved(id, &outcome);
                            results.insert(id, result);
                        }
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => {
                            warn!(error = %join_err, "Search task panicked");
                        }
                    }
                }
            }
        }

        info!(
            succeeded = results.values().filter(|r| r.is_ok()).count(),
            failed = results.values().filter(|r| r.is_err()).count(),
            planned = plan.len(),
            "Search execution settled"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::RetryConfig;
    use crate::error::SearchErrorKind;
    use crate::progress::NoOpObserver;
    use crate::search::throttle::{ManualClock, SearchThrottle};
    use crate::search::{MockSearchProvider, SearchProvider};
    use crate::types::{IntentCategory, SearchDirective};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn plan_of(queries: &[&str]) -> SearchPlan {
        SearchPlan {
            topic: "test topic".into(),
            directives: queries
                .iter()
                .map(|q| SearchDirective {
                    id: Uuid::new_v4(),
                    query_text: q.to_string(),
                    intent: IntentCategory::Background,
                })
                .collect(),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn gateway_over(provider: Arc<dyn SearchProvider>, dir: &TempDir) -> Arc<SearchGateway> {
        let clock = Arc::new(ManualClock::new());
        Arc::new(SearchGateway::with_clock(
            provider,
            ResultCache::open(dir.path()).unwrap(),
            Arc::new(SearchThrottle::with_clock(Duration::ZERO, clock.clone())),
            fast_retry(),
            5,
            clock,
        ))
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_siblings() {
        let provider = Arc::new(MockSearchProvider::new());
        provider.fail_query(
            "doomed query 3",
            SearchErrorKind::Timeout { timeout_secs: 15 },
        );
        let dir = TempDir::new().unwrap();
        let gateway = gateway_over(provider.clone(), &dir);
        let executor = SearchExecutor::new(gateway, 4);

        let queries: Vec<String> = (0..12).map(|i| format!("doomed query {i}")).collect();
        let refs: Vec<&str> = queries.iter().map(|s| s.as_str()).collect();
        let plan = plan_of(&refs);

        let results = executor
            .execute(&plan, Arc::new(NoOpObserver), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 12);
        let failed: Vec<_> = results.values().filter(|r| r.is_err()).collect();
        assert_eq!(failed.len(), 1);
        let failed_id = plan
            .directives
            .iter()
            .find(|d| d.query_text == "doomed query 3")
            .unwrap()
            .id;
        assert!(results[&failed_id].is_err());
    }

    #[tokio::test]
    async fn test_results_keyed_by_directive_id() {
        let provider = Arc::new(MockSearchProvider::new());
        let dir = TempDir::new().unwrap();
        let executor = SearchExecutor::new(gateway_over(provider, &dir), 3);

        let plan = plan_of(&["alpha query", "beta query"]);
        let results = executor
            .execute(&plan, Arc::new(NoOpObserver), &CancellationToken::new())
            .await;

        for directive in &plan.directives {
            let raw = results[&directive.id].as_ref().unwrap();
            assert!(raw[0].title.starts_with(&directive.query_text));
        }
    }

    /// Provider that tracks its maximum observed concurrency.
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for ConcurrencyProbe {
        async fn query(
            &self,
            query_text: &str,
            max_results: usize,
        ) -> Result<Vec<RawResult>, SearchErrorKind> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(MockSearchProvider::canned_results(query_text, max_results))
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let provider = Arc::new(ConcurrencyProbe::new());
        let dir = TempDir::new().unwrap();
        let executor = SearchExecutor::new(gateway_over(provider.clone(), &dir), 2);

        let queries: Vec<String> = (0..6).map(|i| format!("probe query {i}")).collect();
        let refs: Vec<&str> = queries.iter().map(|s| s.as_str()).collect();
        let results = executor
            .execute(&plan_of(&refs), Arc::new(NoOpObserver), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 6);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    /// Provider that never completes.
    struct StalledProvider;

    #[async_trait]
    impl SearchProvider for StalledProvider {
        async fn query(
            &self,
            _query_text: &str,
            _max_results: usize,
        ) -> Result<Vec<RawResult>, SearchErrorKind> {
            std::future::pending::<()>().await;
            unreachable!()
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight() {
        let dir = TempDir::new().unwrap();
        let executor = SearchExecutor::new(gateway_over(Arc::new(StalledProvider), &dir), 4);
        let plan = plan_of(&["stuck one", "stuck two", "stuck three"]);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let results = executor.execute(&plan, Arc::new(NoOpObserver), &cancel).await;
        // Nothing settled; the call returned instead of hanging forever.
        assert!(results.is_empty());
    }

    struct CountingObserver {
        resolved: AtomicUsize,
    }

    impl PipelineObserver for CountingObserver {
        fn on_directive_resolved(&self, _id: Uuid, _outcome: &DirectiveOutcome) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_settle() {
        let provider = Arc::new(MockSearchProvider::new());
        let dir = TempDir::new().unwrap();
        let executor = SearchExecutor::new(gateway_over(provider, &dir), 4);
        let observer = Arc::new(CountingObserver {
            resolved: AtomicUsize::new(0),
        });

        let plan = plan_of(&["observed a", "observed b", "observed c"]);
        executor
            .execute(&plan, observer.clone(), &CancellationToken::new())
            .await;

        assert_eq!(observer.resolved.load(Ordering::SeqCst), 3);
    }
}
