//! Rate limiting for payment node calls.
//!
//! Every call the backend adapter makes goes through one shared
//! [`BackendRateLimiter`]. The limiter bounds how many calls are in flight and
//! spaces consecutive dispatches, so bursts of negotiations queue up instead of
//! hammering the node. Work is dispatched in submission order and never
//! dropped.
//!
//! # Thread Safety
//!
//! The limiter is shared through an `Arc`. Queueing relies on tokio's `Mutex`
//! and `Semaphore`, both of which wake waiters in FIFO order.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Configuration for backend rate limiting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum calls in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum spacing between consecutive dispatches.
    #[serde(default = "default_min_time", with = "duration_ms")]
    pub min_time: Duration,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_min_time() -> Duration {
    Duration::from_millis(1000)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_time: default_min_time(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with custom values.
    pub fn new(max_concurrent: usize, min_time_ms: u64) -> Self {
        Self {
            max_concurrent,
            min_time: Duration::from_millis(min_time_ms),
        }
    }

    /// No spacing and no practical concurrency bound. Meant for tests.
    pub fn unlimited() -> Self {
        Self {
            max_concurrent: Semaphore::MAX_PERMITS,
            min_time: Duration::ZERO,
        }
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the dispatch spacing.
    pub fn with_min_time(mut self, min_time: Duration) -> Self {
        self.min_time = min_time;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Shared scheduler for payment node calls.
///
/// # Example
///
/// ```rust
/// use slashpay_lib::rate_limit::{BackendRateLimiter, RateLimitConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let limiter = BackendRateLimiter::new_shared(RateLimitConfig::unlimited());
/// let answer = limiter.schedule(async { 42 }).await;
/// assert_eq!(answer, 42);
/// # }
/// ```
#[derive(Debug)]
pub struct BackendRateLimiter {
    config: RateLimitConfig,
    permits: Semaphore,
    /// Earliest instant the next call may be dispatched. Holding this lock is
    /// what makes a caller the head of the queue.
    next_slot: Mutex<Option<Instant>>,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
}

impl BackendRateLimiter {
    /// Create a new limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let permits = config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            config,
            permits: Semaphore::new(permits),
            next_slot: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Create a limiter wrapped in an Arc for sharing across tasks.
    pub fn new_shared(config: RateLimitConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// The active configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of calls currently running (for monitoring).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls dispatched since creation (for monitoring).
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Run `task` once a concurrency slot and a dispatch slot are free.
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = {
            let mut next_slot = self.next_slot.lock().await;
            // The semaphore is never closed.
            let permit = self.permits.acquire().await.ok();
            if let Some(slot) = *next_slot {
                tokio::time::sleep_until(slot).await;
            }
            *next_slot = Some(Instant::now() + self.config.min_time);
            permit
        };

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard::enter(&self.in_flight);
        task.await
    }
}

impl Default for BackendRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.min_time, Duration::from_millis(1000));
    }

    #[test]
    fn test_config_deserializes_millis() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"max_concurrent": 2, "min_time": 250}"#).unwrap();
        assert_eq!(config, RateLimitConfig::new(2, 250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_concurrency_and_spacing() {
        let limiter = BackendRateLimiter::new_shared(RateLimitConfig::default());
        let starts = Arc::new(StdMutex::new(Vec::new()));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            let starts = starts.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let inner = limiter.clone();
                limiter
                    .schedule(async move {
                        starts.lock().unwrap().push(Instant::now());
                        peak.fetch_max(inner.in_flight(), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(7)).await;
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 100);
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.dispatched(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_in_submission_order() {
        let limiter = BackendRateLimiter::new_shared(RateLimitConfig::new(1, 100));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.schedule(async move { order.lock().unwrap().push(i) }).await
            }));
            // Let the task reach the queue before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_does_not_wait() {
        let limiter = BackendRateLimiter::new(RateLimitConfig::unlimited());
        let start = Instant::now();
        for _ in 0..10 {
            limiter.schedule(async {}).await;
        }
        assert_eq!(Instant::now(), start);
    }
}
