//! Algorithm trait the façade dispatches through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::key::RateLimitKey;
use super::outcome::RateLimitOutcome;

/// Trait for window-counting algorithm implementations.
///
/// Abstracts over the fixed-window and sliding-window limiters so the façade
/// and reclamation task work with either. The methods are async so a shared
/// counter store (e.g. a remote key-value service) can implement this trait
/// later; the in-memory implementations complete without suspending.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Count one request against `key` at instant `now` and decide whether
    /// it is admitted.
    async fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitOutcome;

    /// Best-effort compensating decrement for a previously admitted request.
    ///
    /// A no-op once the key's window has rolled over or been reclaimed.
    async fn uncount(&self, key: &RateLimitKey);

    /// Reclaim stale per-key state, returning how many entries were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of keys with live state, for introspection and tests.
    fn active_keys(&self) -> usize;
}
