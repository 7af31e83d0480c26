//! Sliding-window-log rate limiting.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::backend::AdmissionBackend;
use super::key::RateLimitKey;
use super::outcome::RateLimitOutcome;
use super::policy::RateLimitPolicy;
use super::store::{WindowState, WindowStore};
use crate::error::Result;

/// Per-key log of request timestamps within the trailing window.
///
/// Aged-out entries are removed on every check, not just ignored, so a key
/// never holds more than `max` timestamps: rejected requests are not
/// appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLog {
    /// In-window request timestamps, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
}

impl RequestLog {
    /// Remove every timestamp at or before `cutoff`.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.timestamps.retain(|t| *t > cutoff);
    }

    /// The oldest in-window timestamp.
    fn oldest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }
}

impl WindowState for RequestLog {
    fn reclaim(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        self.prune(now - window);
        self.timestamps.is_empty()
    }
}

/// Admits at most `max` requests per key within any trailing window,
/// independent of fixed boundaries.
///
/// No boundary-burst weakness, at the cost of O(k) work per request where k
/// is the number of in-window timestamps for the key.
pub struct SlidingWindowLimiter {
    store: WindowStore<RequestLog>,
    max: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Build a limiter from a validated policy.
    pub fn new(policy: &RateLimitPolicy) -> Result<Self> {
        Ok(Self {
            store: WindowStore::new(),
            max: policy.max,
            window: policy.window_delta()?,
        })
    }

    /// Count one request at `now` and decide admission.
    ///
    /// Prune-then-decide-then-append runs under the key's entry lock; a
    /// rejected request's timestamp is never appended.
    pub fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitOutcome {
        let window = self.window;
        let window_start = now - window;

        let outcome = self.store.update(key, RequestLog::default, |log| {
            log.prune(window_start);

            if log.timestamps.len() as u32 >= self.max {
                let reset_time = match log.oldest() {
                    Some(oldest) => oldest + window,
                    // Unreachable with a validated max >= 1; clamped rather
                    // than trusted.
                    None => now + window,
                };
                RateLimitOutcome::rejected(self.max, reset_time, now)
            } else {
                log.timestamps.push(now);
                let reset_time = match log.oldest() {
                    Some(oldest) => oldest + window,
                    None => now + window,
                };
                RateLimitOutcome::allowed(
                    self.max,
                    self.max.saturating_sub(log.timestamps.len() as u32),
                    reset_time,
                )
            }
        });

        if !outcome.allowed {
            debug!(key = %key, limit = self.max, "Sliding window limit exceeded");
        }
        outcome
    }

    /// Remove the most recent timestamp for a key; a no-op once the log has
    /// been reclaimed.
    pub fn uncount(&self, key: &RateLimitKey) {
        self.store.mutate(key, |log| {
            log.timestamps.pop();
        });
    }

    /// Remove logs whose timestamps have all aged out.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep(now, self.window)
    }

    /// Snapshot the log for a key, primarily for tests.
    pub fn log(&self, key: &RateLimitKey) -> Option<RequestLog> {
        self.store.get(key)
    }
}

#[async_trait]
impl AdmissionBackend for SlidingWindowLimiter {
    async fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitOutcome {
        SlidingWindowLimiter::check_at(self, key, now)
    }

    async fn uncount(&self, key: &RateLimitKey) {
        SlidingWindowLimiter::uncount(self, key);
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        SlidingWindowLimiter::sweep(self, now)
    }

    fn active_keys(&self) -> usize {
        self.store.len()
    }
}
