//! Per-key window state storage and reclamation.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::backend::AdmissionBackend;
use super::key::RateLimitKey;

/// Per-key counting state that knows when it can be reclaimed.
pub trait WindowState: Send + Sync + 'static {
    /// Drop aged-out bookkeeping and report whether the whole entry is stale
    /// enough to remove from the store.
    fn reclaim(&mut self, now: DateTime<Utc>, window: Duration) -> bool;
}

/// In-memory mapping from rate limit key to per-key counting state.
///
/// The store is the single source of truth for one limiter's state. The
/// entry lock is held for the whole read-decide-write closure, so checks for
/// the same key are serialized while different keys only contend on a shard
/// lookup.
pub struct WindowStore<S> {
    entries: DashMap<RateLimitKey, S>,
}

impl<S: WindowState> WindowStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Atomically read-modify-write the state for a key, creating it with
    /// `init` on first use.
    pub fn update<R>(
        &self,
        key: &RateLimitKey,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(init);
        f(entry.value_mut())
    }

    /// Atomically mutate the state for a key, if it exists.
    ///
    /// Returns `None` when the key is absent, which makes compensating
    /// decrements no-ops once a window has been reclaimed.
    pub fn mutate<R>(&self, key: &RateLimitKey, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.entries.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    /// Snapshot the state for a key.
    pub fn get(&self, key: &RateLimitKey) -> Option<S>
    where
        S: Clone,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Remove the state for a key.
    pub fn remove(&self, key: &RateLimitKey) {
        self.entries.remove(key);
    }

    /// Number of keys with live state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no state at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry that has gone stale, returning how many were
    /// reclaimed.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| !state.reclaim(now, window));
        before - self.entries.len()
    }
}

impl<S: WindowState> Default for WindowStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that reclaims stale store entries on a fixed cadence.
///
/// Owned explicitly: the service starts one sweeper per limiter during
/// startup and shuts it down during teardown.
pub struct Sweeper {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the reclamation task for a limiter backend.
    pub fn spawn(
        backend: Arc<dyn AdmissionBackend>,
        interval: StdDuration,
        policy: impl Into<String>,
    ) -> Self {
        let policy = policy.into();
        let shutdown = Arc::new(Notify::new());
        let notify = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a fresh store
            // is not swept before it has seen a request.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = backend.sweep(Utc::now()).await;
                        if removed > 0 {
                            debug!(policy = %policy, removed, "Reclaimed stale rate limit state");
                        } else {
                            trace!(policy = %policy, "Reclamation pass found nothing stale");
                        }
                    }
                    _ = notify.notified() => {
                        debug!(policy = %policy, "Stopping reclamation task");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Stop the reclamation task and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            info!(error = %e, "Reclamation task did not exit cleanly");
        }
    }
}
