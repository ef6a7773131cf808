//! Resource governor: distributed counting semaphore for GPU/LLM work.
//!
//! Concurrent LLM calls, embedding batches, and diarization jobs can
//! exhaust VRAM when several workers fire at once. The governor throttles
//! them through a counter held in an atomic key-value backend shared by
//! all workers. The counter is only ever touched via atomic
//! increment/decrement; there are no compound transactions.
//!
//! If the backend is unreachable the governor degrades: callers are
//! admitted with a warning rather than blocked on an infra outage.

mod model_selector;

pub use model_selector::{ModelSelection, SelectorInput, select_transcription_setup};

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::GovernorError;
use crate::{Error, Result};

/// Default key under which the permit counter is stored.
pub const DEFAULT_COUNTER_KEY: &str = "governor:permits";

/// Atomic counter backend shared across workers.
///
/// Implementations must make `incr`/`decr` atomic. Errors signal an
/// unreachable backend and switch the governor into degraded mode for
/// that call.
pub trait AtomicCounter: Send + Sync {
    /// Returns the current value (0 when absent).
    fn get(&self, key: &str) -> Result<i64>;

    /// Atomically increments and returns the new value.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Atomically decrements and returns the new value.
    fn decr(&self, key: &str) -> Result<i64>;

    /// Deletes the key.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-process counter backend.
///
/// Suitable for single-process deployments and tests; multi-worker
/// deployments plug a shared KV (Redis-class) adapter into the same
/// trait.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    value: AtomicI64,
}

impl MemoryCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtomicCounter for MemoryCounter {
    fn get(&self, _key: &str) -> Result<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn incr(&self, _key: &str) -> Result<i64> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn decr(&self, _key: &str) -> Result<i64> {
        Ok(self.value.fetch_sub(1, Ordering::SeqCst) - 1)
    }

    fn delete(&self, _key: &str) -> Result<()> {
        self.value.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Distributed counting semaphore over an [`AtomicCounter`].
pub struct ResourceGovernor {
    counter: Arc<dyn AtomicCounter>,
    key: String,
    capacity: u32,
    default_timeout: Duration,
}

/// A held permit. Released on drop, on every exit path.
pub struct Lease {
    counter: Option<Arc<dyn AtomicCounter>>,
    key: String,
    degraded: bool,
}

impl Lease {
    /// Whether this lease was granted in degraded mode (backend down,
    /// caller admitted without a real permit).
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            match counter.decr(&self.key) {
                Ok(remaining) => {
                    debug!(remaining, "permit released");
                    // Drop the key once idle so a crashed worker's stale
                    // counter does not linger forever.
                    if remaining <= 0 {
                        let _ = counter.delete(&self.key);
                    }
                }
                Err(e) => warn!(error = %e, "failed to release permit"),
            }
        }
    }
}

impl ResourceGovernor {
    /// Creates a governor with the given capacity and default timeout.
    #[must_use]
    pub fn new(counter: Arc<dyn AtomicCounter>, capacity: u32, default_timeout: Duration) -> Self {
        Self {
            counter,
            key: DEFAULT_COUNTER_KEY.to_string(),
            capacity,
            default_timeout,
        }
    }

    /// Overrides the counter key (one key per governed resource).
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Acquires a permit, waiting up to `timeout` (default timeout when
    /// `None`).
    ///
    /// The loop reads the counter, increments when below capacity, and
    /// decrements/retries when the increment overshot due to a race.
    /// Between attempts it sleeps `min(1s, remaining)`.
    ///
    /// # Errors
    ///
    /// [`GovernorError::AcquireTimeout`] when no permit became available
    /// within the deadline, or [`GovernorError::WouldBlock`] when
    /// `blocking` is false and no permit is free right now.
    pub async fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> Result<Lease> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        loop {
            let current = match self.counter.get(&self.key) {
                Ok(v) => v,
                Err(e) => return Ok(self.degraded_lease(&e)),
            };

            if current < i64::from(self.capacity) {
                match self.counter.incr(&self.key) {
                    Ok(new_count) if new_count <= i64::from(self.capacity) => {
                        info!(in_use = new_count, capacity = self.capacity, "permit acquired");
                        return Ok(Lease {
                            counter: Some(Arc::clone(&self.counter)),
                            key: self.key.clone(),
                            degraded: false,
                        });
                    }
                    Ok(_) => {
                        // Lost the race: another worker incremented first.
                        if let Err(e) = self.counter.decr(&self.key) {
                            warn!(error = %e, "failed to undo overshoot increment");
                        }
                    }
                    Err(e) => return Ok(self.degraded_lease(&e)),
                }
            }

            if !blocking {
                return Err(Error::Governor(GovernorError::WouldBlock));
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                let in_use = self.counter.get(&self.key).unwrap_or(-1);
                return Err(Error::Governor(GovernorError::AcquireTimeout {
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    in_use,
                    capacity: self.capacity,
                }));
            }

            let wait = Duration::from_secs(1).min(timeout.saturating_sub(elapsed));
            debug!(
                in_use = current,
                capacity = self.capacity,
                wait_ms = wait.as_millis() as u64,
                "waiting for permit"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Current number of held permits.
    #[must_use]
    pub fn current_usage(&self) -> i64 {
        self.counter.get(&self.key).unwrap_or(0)
    }

    /// Emergency reset of the counter. Only for recovering from crashed
    /// workers that leaked permits; normal release happens on drop.
    pub fn reset(&self) {
        if let Err(e) = self.counter.delete(&self.key) {
            warn!(error = %e, "failed to reset governor counter");
        } else {
            warn!("governor counter forcefully reset");
        }
    }

    fn degraded_lease(&self, cause: &Error) -> Lease {
        warn!(error = %cause, "counter backend unreachable, admitting caller (degraded mode)");
        Lease {
            counter: None,
            key: self.key.clone(),
            degraded: true,
        }
    }
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter whose operations always fail, simulating a KV outage.
    struct DeadCounter;

    impl AtomicCounter for DeadCounter {
        fn get(&self, _key: &str) -> Result<i64> {
            Err(Error::Store(crate::error::StoreError::Unavailable {
                backend: "record",
                reason: "connection refused".to_string(),
            }))
        }
        fn incr(&self, _key: &str) -> Result<i64> {
            self.get("")
        }
        fn decr(&self, _key: &str) -> Result<i64> {
            self.get("")
        }
        fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::Store(crate::error::StoreError::Unavailable {
                backend: "record",
                reason: "connection refused".to_string(),
            }))
        }
    }

    fn governor(capacity: u32) -> ResourceGovernor {
        ResourceGovernor::new(
            Arc::new(MemoryCounter::new()),
            capacity,
            Duration::from_secs(120),
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gov = governor(2);
        let lease = gov.acquire(true, None).await.unwrap();
        assert_eq!(gov.current_usage(), 1);
        assert!(!lease.is_degraded());
        drop(lease);
        assert_eq!(gov.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_acquire_up_to_capacity() {
        let gov = governor(2);
        let a = gov.acquire(true, None).await.unwrap();
        let b = gov.acquire(true, None).await.unwrap();
        assert_eq!(gov.current_usage(), 2);

        // Third non-blocking acquisition fails immediately.
        let c = gov.acquire(false, None).await;
        assert!(matches!(
            c,
            Err(Error::Governor(GovernorError::WouldBlock))
        ));

        drop(a);
        drop(b);
        assert_eq!(gov.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_blocking_acquire_times_out() {
        let gov = governor(1);
        let _held = gov.acquire(true, None).await.unwrap();

        let start = Instant::now();
        let result = gov
            .acquire(true, Some(Duration::from_millis(120)))
            .await;
        assert!(matches!(
            result,
            Err(Error::Governor(GovernorError::AcquireTimeout { .. }))
        ));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_zero_capacity_always_times_out() {
        let gov = governor(0);
        let result = gov
            .acquire(true, Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(
            result,
            Err(Error::Governor(GovernorError::AcquireTimeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_release_unblocks_waiter() {
        let gov = Arc::new(governor(1));
        let held = gov.acquire(true, None).await.unwrap();

        let waiter = {
            let gov = Arc::clone(&gov);
            tokio::spawn(async move { gov.acquire(true, Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        let lease = waiter.await.unwrap().unwrap();
        assert!(!lease.is_degraded());
        drop(lease);
        assert_eq!(gov.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_degraded_mode_admits_caller() {
        let gov = ResourceGovernor::new(Arc::new(DeadCounter), 1, Duration::from_secs(1));
        let lease = gov.acquire(true, None).await.unwrap();
        assert!(lease.is_degraded());
        // Dropping a degraded lease must not attempt a release.
        drop(lease);
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let gov = governor(4);
        let lease = gov.acquire(true, None).await.unwrap();
        assert_eq!(gov.current_usage(), 1);
        gov.reset();
        assert_eq!(gov.current_usage(), 0);
        // Lease drop after reset drives the counter negative and the
        // cleanup path deletes the key again; usage must not go below 0
        // from the governor's perspective on the next acquire.
        drop(lease);
        let _fresh = gov.acquire(true, None).await.unwrap();
    }
}
