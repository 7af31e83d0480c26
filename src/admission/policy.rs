//! Rate limit policies: per-limiter configuration and preset policies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::{ClientInfo, KeySource};
use crate::error::{GatehouseError, Result};

/// Default window duration for general use.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default request ceiling per window.
pub const DEFAULT_MAX: u32 = 100;
/// Default rejection reason.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Predicate evaluated before counting; `true` admits the request without
/// touching the store.
pub type SkipPredicate = Arc<dyn Fn(&ClientInfo) -> bool + Send + Sync>;

/// The window-counting algorithm a policy uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Discrete, non-overlapping time buckets. Cheap, but a burst straddling
    /// a window boundary can admit up to twice the ceiling.
    #[default]
    Fixed,
    /// Rolling log of request timestamps. Smoother limiting at O(k) work per
    /// request, where k is the number of in-window timestamps for the key.
    Sliding,
}

/// Immutable configuration for one limiter instance.
#[derive(Clone)]
pub struct RateLimitPolicy {
    /// Name used for registry lookup and log context.
    pub name: String,
    /// The window-counting algorithm.
    pub algorithm: Algorithm,
    /// Window duration.
    pub window: Duration,
    /// Request ceiling per window.
    pub max: u32,
    /// Rejection reason surfaced to the caller.
    pub message: String,
    /// How the rate limit key is derived from caller identity.
    pub key_source: KeySource,
    /// Retroactively uncount requests that complete with a non-error status.
    pub skip_successful_requests: bool,
    /// Retroactively uncount requests that complete with an error status.
    pub skip_failed_requests: bool,
    /// Optional predicate that bypasses counting entirely.
    pub skip: Option<SkipPredicate>,
}

impl RateLimitPolicy {
    /// A policy with the documented defaults: 100 requests per 15 minutes,
    /// keyed by caller IP, fixed window, never skipped.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            algorithm: Algorithm::Fixed,
            window: DEFAULT_WINDOW,
            max: DEFAULT_MAX,
            message: DEFAULT_MESSAGE.to_string(),
            key_source: KeySource::Ip,
            skip_successful_requests: false,
            skip_failed_requests: false,
            skip: None,
        }
    }

    /// Set the window-counting algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the window duration.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the request ceiling per window.
    pub fn with_max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    /// Set the rejection reason.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set how the rate limit key is derived.
    pub fn with_key_source(mut self, key_source: KeySource) -> Self {
        self.key_source = key_source;
        self
    }

    /// Uncount requests that complete successfully (status < 400).
    pub fn with_skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    /// Uncount requests that complete with an error status (>= 400).
    pub fn with_skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed_requests = skip;
        self
    }

    /// Set a predicate that admits matching requests without counting them.
    pub fn with_skip(mut self, skip: impl Fn(&ClientInfo) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Whether final accounting is deferred until the request completes.
    pub fn deferred_accounting(&self) -> bool {
        self.skip_successful_requests || self.skip_failed_requests
    }

    /// Fail fast on configurations that would silently disable limiting.
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(GatehouseError::Policy(format!(
                "policy '{}': max must be greater than zero",
                self.name
            )));
        }
        if self.window.is_zero() {
            return Err(GatehouseError::Policy(format!(
                "policy '{}': window duration must be greater than zero",
                self.name
            )));
        }
        if chrono::Duration::from_std(self.window).is_err() {
            return Err(GatehouseError::Policy(format!(
                "policy '{}': window duration is out of range",
                self.name
            )));
        }
        Ok(())
    }

    /// The window duration as a chrono delta, for wall-clock arithmetic.
    pub(crate) fn window_delta(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.window).map_err(|_| {
            GatehouseError::Policy(format!(
                "policy '{}': window duration is out of range",
                self.name
            ))
        })
    }

    /// General traffic: 100 requests per 15 minutes per IP.
    pub fn general() -> Self {
        Self::new("general")
    }

    /// Sensitive endpoints: 20 requests per 15 minutes per IP.
    pub fn strict() -> Self {
        Self::new("strict")
            .with_max(20)
            .with_message("Too many requests to this endpoint, please try again later.")
    }

    /// Authentication attempts: 5 per 15 minutes per IP, counting only
    /// failed attempts against the budget.
    pub fn auth() -> Self {
        Self::new("auth")
            .with_max(5)
            .with_message("Too many authentication attempts, please try again later.")
            .with_skip_successful_requests(true)
    }

    /// Authenticated API traffic: 30 requests per minute, keyed by principal
    /// id falling back to IP.
    pub fn api() -> Self {
        Self::new("api")
            .with_window(Duration::from_secs(60))
            .with_max(30)
            .with_message("API rate limit exceeded, please slow down.")
            .with_key_source(KeySource::Principal)
    }

    /// The preset policies a collaborating service is expected to configure.
    pub fn presets() -> Vec<Self> {
        vec![Self::general(), Self::strict(), Self::auth(), Self::api()]
    }
}

impl std::fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("window", &self.window)
            .field("max", &self.max)
            .field("message", &self.message)
            .field("key_source", &self.key_source)
            .field("skip_successful_requests", &self.skip_successful_requests)
            .field("skip_failed_requests", &self.skip_failed_requests)
            .field("skip", &self.skip.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}
