//! Shared throttle enforcing minimum spacing between external calls.
//!
//! One throttle instance is shared by every directive resolving
//! concurrently; it is passed into the gateway explicitly rather than
//! living as a process-wide singleton. Callers serialize only the spacing
//! decision (reserving the next send instant under a mutex), then wait
//! out their reservation without holding the lock.
//!
//! Time access goes through the `Clock` trait so tests can drive the
//! throttle with a fake clock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

/// Time source used by the throttle.
#[async_trait]
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
    /// Sleep until `deadline` (no-op if it has passed).
    async fn sleep_until(&self, deadline: Instant);
}

/// Real time via `tokio::time`.
#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            tokio::time::sleep(deadline - now).await;
        }
    }
}

/// A fake clock for tests: `sleep_until` advances time instantly and
/// records how long each sleep would have been.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<Instant>,
    slept: std::sync::Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Instant::now()),
            slept: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Durations of every sleep performed so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }

    /// Total time slept so far.
    pub fn total_slept(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut now = self.now.lock().unwrap();
        if deadline > *now {
            self.slept.lock().unwrap().push(deadline - *now);
            *now = deadline;
        }
    }
}

/// Enforces a minimum interval between external provider calls.
pub struct SearchThrottle {
    min_spacing: Duration,
    clock: Arc<dyn Clock>,
    next_slot: Mutex<Option<Instant>>,
}

impl SearchThrottle {
    /// Create a throttle with the given spacing, driven by real time.
    pub fn new(min_spacing: Duration) -> Self {
        Self::with_clock(min_spacing, Arc::new(SystemClock))
    }

    /// Create a throttle driven by an injected clock.
    pub fn with_clock(min_spacing: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_spacing,
            clock,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next send slot and wait until it arrives.
    ///
    /// Concurrent callers contend only on the reservation; the wait itself
    /// happens outside the lock, so a slow sleeper never blocks the next
    /// caller from reserving its own slot.
    pub async fn acquire_slot(&self) {
        let deadline = {
            let mut next = self.next_slot.lock().await;
            let now = self.clock.now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_spacing);
            slot
        };
        trace!(?deadline, "Throttle slot reserved");
        self.clock.sleep_until(deadline).await;
    }

    /// The configured spacing.
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_slot_is_immediate() {
        let clock = Arc::new(ManualClock::new());
        let throttle = SearchThrottle::with_clock(Duration::from_millis(500), clock.clone());
        throttle.acquire_slot().await;
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sequential_slots_are_spaced() {
        let clock = Arc::new(ManualClock::new());
        let throttle = SearchThrottle::with_clock(Duration::from_millis(500), clock.clone());

        throttle.acquire_slot().await;
        throttle.acquire_slot().await;
        throttle.acquire_slot().await;

        // First slot free, then one spacing interval each.
        assert_eq!(clock.total_slept(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_concurrent_slots_serialize_spacing() {
        let clock = Arc::new(ManualClock::new());
        let throttle = Arc::new(SearchThrottle::with_clock(
            Duration::from_millis(200),
            clock.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = throttle.clone();
            handles.push(tokio::spawn(async move { t.acquire_slot().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Four callers: slots at t, t+200, t+400, t+600.
        assert_eq!(clock.total_slept(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_zero_spacing_never_sleeps() {
        let clock = Arc::new(ManualClock::new());
        let throttle = SearchThrottle::with_clock(Duration::ZERO, clock.clone());
        for _ in 0..5 {
            throttle.acquire_slot().await;
        }
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }
}
