//! Fixed-window rate limiting.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::backend::AdmissionBackend;
use super::key::RateLimitKey;
use super::outcome::RateLimitOutcome;
use super::policy::RateLimitPolicy;
use super::store::{WindowState, WindowStore};
use crate::error::Result;

/// Per-key counting state for one fixed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    /// Requests counted in the current window.
    pub count: u32,
    /// When the current window ends; fixed for the window's lifetime.
    pub reset_time: DateTime<Utc>,
    /// When the first request of the current window arrived.
    pub first_request_time: DateTime<Utc>,
}

impl WindowRecord {
    /// State for a window starting at `now`, before any request is counted.
    fn start(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            reset_time: now + window,
            first_request_time: now,
        }
    }
}

impl WindowState for WindowRecord {
    fn reclaim(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        // Stale for a full cycle past reset with no new requests.
        now.signed_duration_since(self.reset_time) > window
    }
}

/// Admits at most `max` requests per key within each non-overlapping window.
///
/// Window boundaries are wall-clock based: a burst straddling a boundary can
/// admit up to twice the ceiling across the two windows. Callers needing
/// smoother limiting use the sliding-window limiter instead.
pub struct FixedWindowLimiter {
    store: WindowStore<WindowRecord>,
    max: u32,
    window: Duration,
    skip_failed_requests: bool,
}

impl FixedWindowLimiter {
    /// Build a limiter from a validated policy.
    pub fn new(policy: &RateLimitPolicy) -> Result<Self> {
        Ok(Self {
            store: WindowStore::new(),
            max: policy.max,
            window: policy.window_delta()?,
            skip_failed_requests: policy.skip_failed_requests,
        })
    }

    /// Count one request at `now` and decide admission.
    ///
    /// The whole lookup-decide-update runs under the key's entry lock, so
    /// concurrent requests for one key never observe the same pre-update
    /// count.
    pub fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitOutcome {
        let outcome = self.store.update(
            key,
            || WindowRecord::start(now, self.window),
            |record| {
                if now >= record.reset_time {
                    *record = WindowRecord::start(now, self.window);
                }
                record.count = record.count.saturating_add(1);

                if record.count > self.max {
                    if self.skip_failed_requests {
                        // The rejected request itself is not counted against
                        // future budget.
                        record.count = record.count.saturating_sub(1);
                    }
                    RateLimitOutcome::rejected(self.max, record.reset_time, now)
                } else {
                    RateLimitOutcome::allowed(
                        self.max,
                        self.max.saturating_sub(record.count),
                        record.reset_time,
                    )
                }
            },
        );

        if !outcome.allowed {
            debug!(key = %key, limit = self.max, "Fixed window limit exceeded");
        }
        outcome
    }

    /// Decrement the key's in-window count, clamped at zero; a no-op once
    /// the window has been reclaimed.
    pub fn uncount(&self, key: &RateLimitKey) {
        self.store.mutate(key, |record| {
            record.count = record.count.saturating_sub(1);
        });
    }

    /// Remove records stale for a full window cycle.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep(now, self.window)
    }

    /// Snapshot the record for a key, primarily for tests.
    pub fn record(&self, key: &RateLimitKey) -> Option<WindowRecord> {
        self.store.get(key)
    }
}

#[async_trait]
impl AdmissionBackend for FixedWindowLimiter {
    async fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitOutcome {
        FixedWindowLimiter::check_at(self, key, now)
    }

    async fn uncount(&self, key: &RateLimitKey) {
        FixedWindowLimiter::uncount(self, key);
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        FixedWindowLimiter::sweep(self, now)
    }

    fn active_keys(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn limiter(max: u32, window_secs: u64) -> FixedWindowLimiter {
        let policy = RateLimitPolicy::new("test")
            .with_max(max)
            .with_window(StdDuration::from_secs(window_secs));
        FixedWindowLimiter::new(&policy).unwrap()
    }

    fn key(name: &str) -> RateLimitKey {
        RateLimitKey::new(name)
    }

    #[test]
    fn test_admits_up_to_max_then_rejects() {
        let limiter = limiter(3, 60);
        let k = key("A");

        for (t, expected_remaining) in [(0, 2), (1, 1), (2, 0)] {
            let outcome = limiter.check_at(&k, at(t));
            assert!(outcome.allowed);
            assert_eq!(outcome.remaining, expected_remaining);
        }

        let outcome = limiter.check_at(&k, at(3));
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(outcome.retry_after_secs, Some(57));
    }

    #[test]
    fn test_count_equal_to_max_admits() {
        let limiter = limiter(1, 60);
        let outcome = limiter.check_at(&key("A"), at(0));
        assert!(outcome.allowed, "the max-th request is admitted");
        assert!(!limiter.check_at(&key("A"), at(1)).allowed);
    }

    #[test]
    fn test_rollover_resets_budget() {
        let limiter = limiter(3, 60);
        let k = key("A");

        for t in 0..3 {
            assert!(limiter.check_at(&k, at(t)).allowed);
        }
        assert!(!limiter.check_at(&k, at(3)).allowed);

        // New window: allowed again with a fresh count of 1.
        let outcome = limiter.check_at(&k, at(61));
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(limiter.record(&k).unwrap().count, 1);
        assert_eq!(limiter.record(&k).unwrap().first_request_time, at(61));
        assert_eq!(limiter.record(&k).unwrap().reset_time, at(121));
    }

    #[test]
    fn test_reset_time_fixed_within_window() {
        let limiter = limiter(10, 60);
        let k = key("A");

        let first = limiter.check_at(&k, at(0));
        let second = limiter.check_at(&k, at(30));
        assert_eq!(first.reset_time, at(60));
        assert_eq!(second.reset_time, at(60));
    }

    #[test]
    fn test_boundary_burst_admits_up_to_twice_max() {
        let limiter = limiter(5, 60);
        let k = key("A");

        let mut admitted = 0;
        // Exhaust the first window just before it ends.
        for _ in 0..5 {
            if limiter.check_at(&k, at(59)).allowed {
                admitted += 1;
            }
        }
        // Immediately after the boundary the budget is fresh.
        for _ in 0..5 {
            if limiter.check_at(&k, at(119)).allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_retry_after_decreases_toward_reset() {
        let limiter = limiter(1, 60);
        let k = key("A");
        limiter.check_at(&k, at(0));

        let first = limiter.check_at(&k, at(10));
        let second = limiter.check_at(&k, at(40));
        assert_eq!(first.retry_after_secs, Some(50));
        assert_eq!(second.retry_after_secs, Some(20));
    }

    #[test]
    fn test_keys_are_isolated() {
        let limiter = limiter(1, 60);

        assert!(limiter.check_at(&key("A"), at(0)).allowed);
        assert!(!limiter.check_at(&key("A"), at(1)).allowed);

        let other = limiter.check_at(&key("B"), at(2));
        assert!(other.allowed);
        assert_eq!(other.remaining, 0);
    }

    #[test]
    fn test_rejection_with_skip_failed_requests_uncounts_itself() {
        let policy = RateLimitPolicy::new("test")
            .with_max(2)
            .with_window(StdDuration::from_secs(60))
            .with_skip_failed_requests(true);
        let limiter = FixedWindowLimiter::new(&policy).unwrap();
        let k = key("A");

        limiter.check_at(&k, at(0));
        limiter.check_at(&k, at(1));
        assert_eq!(limiter.record(&k).unwrap().count, 2);

        assert!(!limiter.check_at(&k, at(2)).allowed);
        // The rejected request was decremented back out.
        assert_eq!(limiter.record(&k).unwrap().count, 2);
    }

    #[test]
    fn test_uncount_clamps_at_zero() {
        let limiter = limiter(5, 60);
        let k = key("A");

        limiter.check_at(&k, at(0));
        limiter.uncount(&k);
        limiter.uncount(&k);
        assert_eq!(limiter.record(&k).unwrap().count, 0);

        // Absent key: no-op.
        limiter.uncount(&key("missing"));
        assert!(limiter.record(&key("missing")).is_none());
    }

    #[test]
    fn test_sweep_reclaims_after_a_full_stale_cycle() {
        let limiter = limiter(5, 60);
        limiter.check_at(&key("A"), at(0)); // reset at t=60

        // Not yet stale for a full window past reset.
        assert_eq!(limiter.sweep(at(119)), 0);
        // Stale for more than one window duration past reset.
        assert_eq!(limiter.sweep(at(121)), 1);
        assert_eq!(limiter.record(&key("A")), None);
    }

    #[tokio::test]
    async fn test_backend_trait_counts_through_the_store() {
        let limiter = limiter(2, 60);
        let backend: &dyn AdmissionBackend = &limiter;
        let k = key("A");

        assert!(backend.check_at(&k, at(0)).await.allowed);
        assert!(backend.check_at(&k, at(1)).await.allowed);
        assert!(!backend.check_at(&k, at(2)).await.allowed);
        assert_eq!(backend.active_keys(), 1);

        backend.uncount(&k).await;
        assert!(backend.check_at(&k, at(3)).await.allowed);
    }
}
