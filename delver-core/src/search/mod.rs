//! Search gateway: rate-limited, retrying, cache-backed search access.
//!
//! The gateway is the only component that talks to the external search
//! provider. It consults the result cache first, collapses concurrent
//! duplicate queries into a single fetch, spaces external calls through
//! the shared throttle, and retries transient failures with exponential
//! backoff before surfacing a per-directive `SearchFailure`.

pub mod duckduckgo;
pub mod throttle;

use crate::cache::{CacheKey, ResultCache};
use crate::config::RetryConfig;
use crate::error::{SearchErrorKind, SearchFailure};
use crate::types::{RawResult, SearchDirective};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use throttle::{Clock, SearchThrottle, SystemClock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The external search provider collaborator: one query in, ranked
/// results out.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Issue a single query against the provider.
    async fn query(
        &self,
        query_text: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchErrorKind>;

    /// Provider name, for logging.
    fn name(&self) -> &str;
}

/// Rate-limited, retrying, cache-backed wrapper around a search provider.
pub struct SearchGateway {
    provider: Arc<dyn SearchProvider>,
    cache: ResultCache,
    throttle: Arc<SearchThrottle>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    max_results: usize,
    external_calls: AtomicU64,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SearchGateway {
    /// Create a gateway over the given provider, cache, and shared throttle.
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        cache: ResultCache,
        throttle: Arc<SearchThrottle>,
        retry: RetryConfig,
        max_results: usize,
    ) -> Self {
        Self::with_clock(provider, cache, throttle, retry, max_results, Arc::new(SystemClock))
    }

    /// Create a gateway whose retry backoff sleeps are driven by an
    /// injected clock.
    pub fn with_clock(
        provider: Arc<dyn SearchProvider>,
        cache: ResultCache,
        throttle: Arc<SearchThrottle>,
        retry: RetryConfig,
        max_results: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            cache,
            throttle,
            clock,
            retry,
            max_results,
            external_calls: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a directive's results.
    ///
    /// Cache hits return immediately with zero external calls. On a miss,
    /// exactly one external query is issued (per unique normalized query,
    /// even under concurrency), its results are durably cached, and the
    /// cached results are returned.
    pub async fn search(
        &self,
        directive: &SearchDirective,
    ) -> Result<Vec<RawResult>, SearchFailure> {
        let key = CacheKey::for_query(&directive.query_text);

        if let Some(entry) = self.cache.get(&key) {
            debug!(directive = %directive.id, query = %directive.query_text, "Serving from cache");
            return Ok(entry.raw_results);
        }

        // Collapse concurrent duplicates: one fetch per unique key.
        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(key.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _fetch_guard = key_lock.lock().await;

        // A concurrent duplicate may have filled the cache while we waited.
        if let Some(entry) = self.cache.get(&key) {
            debug!(directive = %directive.id, "Duplicate query collapsed to cached fetch");
            return Ok(entry.raw_results);
        }

        let results = self.fetch_with_retry(directive).await?;

        if let Err(e) = self.cache.put(&key, &directive.query_text, &results) {
            warn!(directive = %directive.id, error = %e, "Failed to persist search results to cache");
        }

        Ok(results)
    }

    /// Number of external provider calls issued so far (retries included).
    pub fn external_calls(&self) -> u64 {
        self.external_calls.load(Ordering::Relaxed)
    }

    async fn fetch_with_retry(
        &self,
        directive: &SearchDirective,
    ) -> Result<Vec<RawResult>, SearchFailure> {
        let mut attempts = 0;
        loop {
            self.throttle.acquire_slot().await;
            self.external_calls.fetch_add(1, Ordering::Relaxed);
            attempts += 1;

            match self
                .provider
                .query(&directive.query_text, self.max_results)
                .await
            {
                Ok(results) => {
                    info!(
                        directive = %directive.id,
                        provider = self.provider.name(),
                        results = results.len(),
                        "Search succeeded"
                    );
                    return Ok(results);
                }
                Err(kind) => {
                    if !kind.is_retryable() || attempts > self.retry.max_retries {
                        return Err(SearchFailure {
                            directive_id: directive.id,
                            attempts,
                            kind,
                        });
                    }
                    let backoff_ms = compute_backoff(&self.retry, attempts - 1, &kind);
                    warn!(
                        directive = %directive.id,
                        attempt = attempts,
                        max = self.retry.max_retries + 1,
                        backoff_ms,
                        error = %kind,
                        "Retrying search after transient error"
                    );
                    let deadline = self.clock.now() + Duration::from_millis(backoff_ms);
                    self.clock.sleep_until(deadline).await;
                }
            }
        }
    }
}

/// Compute backoff delay, respecting a provider-supplied retry-after.
fn compute_backoff(config: &RetryConfig, attempt: u32, kind: &SearchErrorKind) -> u64 {
    if let SearchErrorKind::RateLimited {
        retry_after_secs: Some(secs),
    } = kind
    {
        let server_ms = secs * 1000;
        return server_ms.max(compute_exponential_backoff(config, attempt));
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter, derived from the subsecond clock instead of a
        // rand dependency.
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Simple deterministic pseudo-random for jitter (avoids pulling in rand).
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// A scripted search provider for tests: deterministic results, optional
/// per-query failures, and call counting.
pub struct MockSearchProvider {
    calls: AtomicU64,
    failures: std::sync::Mutex<HashMap<String, SearchErrorKind>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            failures: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Make every call for `query_text` fail with `kind`.
    pub fn fail_query(&self, query_text: &str, kind: SearchErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .insert(query_text.to_string(), kind);
    }

    /// Number of `query` invocations so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The deterministic results this mock returns for a query.
    pub fn canned_results(query_text: &str, max_results: usize) -> Vec<RawResult> {
        let slug: String = query_text
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        (0..max_results as u32)
            .map(|rank| RawResult {
                title: format!("{query_text} - result {rank}"),
                url: format!("https://example.com/{slug}/{rank}"),
                snippet: format!("Snippet {rank} about {query_text}."),
                source_rank: rank,
            })
            .collect()
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn query(
        &self,
        query_text: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchErrorKind> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failures.lock().unwrap().get(query_text) {
            return Err(kind.clone());
        }
        Ok(Self::canned_results(query_text, max_results))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
