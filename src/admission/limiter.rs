//! The limiter façade: the single entry point the request pipeline calls.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::backend::AdmissionBackend;
use super::fixed::FixedWindowLimiter;
use super::key::{ClientInfo, RateLimitKey};
use super::outcome::{RateLimitExceeded, RateLimitOutcome};
use super::policy::{Algorithm, RateLimitPolicy};
use super::sliding::SlidingWindowLimiter;
use super::store::Sweeper;
use crate::error::Result;

/// An admitted request.
///
/// Carries the outcome the response headers are built from and, when the
/// policy defers accounting, the key to settle once the request completes.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The allowed outcome for this check.
    pub outcome: RateLimitOutcome,
    key: Option<RateLimitKey>,
}

/// Wraps a window-counting algorithm with key derivation, skip predicates,
/// and deferred accounting.
///
/// Thread-safe and shared across the request pipeline behind an `Arc`. The
/// façade never holds per-key state of its own: every check reads and writes
/// through the algorithm's store.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    window: Duration,
    backend: Arc<dyn AdmissionBackend>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// Build a limiter for a policy.
    ///
    /// Fails fast on invalid configuration: a service must refuse to start
    /// rather than silently disable limiting.
    pub fn new(policy: RateLimitPolicy) -> Result<Self> {
        policy.validate()?;
        let window = policy.window_delta()?;

        let backend: Arc<dyn AdmissionBackend> = match policy.algorithm {
            Algorithm::Fixed => Arc::new(FixedWindowLimiter::new(&policy)?),
            Algorithm::Sliding => Arc::new(SlidingWindowLimiter::new(&policy)?),
        };

        debug!(
            policy = %policy.name,
            algorithm = ?policy.algorithm,
            max = policy.max,
            window_secs = policy.window.as_secs(),
            "Creating rate limiter"
        );

        Ok(Self {
            policy,
            window,
            backend,
            sweeper: Mutex::new(None),
        })
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Number of keys with live state, for introspection and tests.
    pub fn active_keys(&self) -> usize {
        self.backend.active_keys()
    }

    /// Decide whether a request may proceed.
    ///
    /// On rejection the error carries everything the pipeline boundary needs
    /// for the 429 response; it is always recoverable there and must never
    /// be suppressed anywhere else.
    pub async fn admit(
        &self,
        client: &ClientInfo,
    ) -> std::result::Result<Admission, RateLimitExceeded> {
        self.admit_at(client, Utc::now()).await
    }

    /// Admission check at an explicit instant; lets tests drive time.
    pub async fn admit_at(
        &self,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> std::result::Result<Admission, RateLimitExceeded> {
        if let Some(skip) = &self.policy.skip {
            if skip(client) {
                trace!(policy = %self.policy.name, "Skip predicate matched; admitting without counting");
                return Ok(Admission {
                    outcome: RateLimitOutcome::allowed(
                        self.policy.max,
                        self.policy.max,
                        now + self.window,
                    ),
                    key: None,
                });
            }
        }

        let key = self.policy.key_source.derive(client);
        trace!(policy = %self.policy.name, key = %key, "Checking rate limit");

        let outcome = self.backend.check_at(&key, now).await;
        if outcome.allowed {
            let key = self.policy.deferred_accounting().then_some(key);
            Ok(Admission { outcome, key })
        } else {
            Err(RateLimitExceeded {
                message: self.policy.message.clone(),
                outcome,
            })
        }
    }

    /// Settle deferred accounting for an admitted request once its terminal
    /// status is known.
    ///
    /// A no-op unless the policy skips successful or failed requests.
    pub async fn complete(&self, admission: &Admission, status: u16) {
        if let Some(key) = &admission.key {
            self.settle(key, status).await;
        }
    }

    /// Completion report for pipelines that checked admission remotely.
    ///
    /// Re-derives the key from the caller identity and settles as
    /// [`complete`](Self::complete) would.
    pub async fn report_completion(&self, client: &ClientInfo, status: u16) {
        if !self.policy.deferred_accounting() {
            return;
        }
        if let Some(skip) = &self.policy.skip {
            if skip(client) {
                return;
            }
        }
        let key = self.policy.key_source.derive(client);
        self.settle(&key, status).await;
    }

    async fn settle(&self, key: &RateLimitKey, status: u16) {
        let uncount = (self.policy.skip_successful_requests && status < 400)
            || (self.policy.skip_failed_requests && status >= 400);
        if uncount {
            trace!(policy = %self.policy.name, key = %key, status, "Uncounting completed request");
            self.backend.uncount(key).await;
        }
    }

    /// Start the background reclamation task for this limiter's store.
    pub fn start_reclamation(&self, interval: StdDuration) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            warn!(policy = %self.policy.name, "Reclamation task already running");
            return;
        }
        debug!(
            policy = %self.policy.name,
            interval_secs = interval.as_secs(),
            "Starting reclamation task"
        );
        *slot = Some(Sweeper::spawn(
            self.backend.clone(),
            interval,
            self.policy.name.clone(),
        ));
    }

    /// Stop the reclamation task, if running.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("active_keys", &self.backend.active_keys())
            .finish()
    }
}
