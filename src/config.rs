//! Configuration management for Gatehouse.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::{Algorithm, KeySource, RateLimitPolicy, DEFAULT_MESSAGE};

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// How often the reclamation task sweeps stale per-key state, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Named rate limit policies; an empty table installs the presets
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            policies: HashMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl AdmissionConfig {
    /// The reclamation cadence as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// One named rate limit policy as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window-counting algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Request ceiling per window
    #[serde(default = "default_max")]
    pub max: u32,

    /// Rejection reason surfaced to the caller
    #[serde(default = "default_message")]
    pub message: String,

    /// How the rate limit key is derived
    #[serde(default)]
    pub key: KeySource,

    /// Uncount requests that complete with a non-error status
    #[serde(default)]
    pub skip_successful_requests: bool,

    /// Uncount requests that complete with an error status
    #[serde(default)]
    pub skip_failed_requests: bool,
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_max() -> u32 {
    100
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl PolicyConfig {
    /// Convert the file form into a runtime policy named `name`.
    ///
    /// Validation happens when the limiter is constructed.
    pub fn to_policy(&self, name: &str) -> RateLimitPolicy {
        RateLimitPolicy::new(name)
            .with_algorithm(self.algorithm)
            .with_window(Duration::from_secs(self.window_secs))
            .with_max(self.max)
            .with_message(self.message.clone())
            .with_key_source(self.key)
            .with_skip_successful_requests(self.skip_successful_requests)
            .with_skip_failed_requests(self.skip_failed_requests)
    }
}

impl GatehouseConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::GatehouseError::Config(e.to_string()))
    }
}
