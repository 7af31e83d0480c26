use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use gatehouse::admission::{RateLimitPolicy, RateLimiter};
use gatehouse::config::GatehouseConfig;
use gatehouse::error::Result;
use gatehouse::http::{AdmissionService, HttpServer};

/// Request admission control service.
#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Gatehouse Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GatehouseConfig::from_file(path)?,
        None => GatehouseConfig::default(),
    };
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Build the named-limiter registry and start reclamation for each store.
    let limiters = build_limiters(&config)?;
    let sweep_interval = config.admission.sweep_interval();
    for limiter in limiters.values() {
        limiter.start_reclamation(sweep_interval);
    }
    info!(policies = limiters.len(), "Rate limiters initialized");

    let service = AdmissionService::new(limiters.clone());
    let server = HttpServer::new(config.server.listen_addr);

    // Run the server with graceful shutdown on Ctrl+C
    server
        .serve_with_shutdown(service.router(), shutdown_signal())
        .await?;

    // Stop the reclamation tasks before exiting.
    for limiter in limiters.values() {
        limiter.shutdown().await;
    }

    info!("Gatehouse Admission Control Service stopped");
    Ok(())
}

/// Construct the limiters named in the configuration, or the preset policies
/// when none are configured.
fn build_limiters(config: &GatehouseConfig) -> Result<HashMap<String, Arc<RateLimiter>>> {
    let mut limiters = HashMap::new();

    if config.admission.policies.is_empty() {
        for policy in RateLimitPolicy::presets() {
            let name = policy.name.clone();
            limiters.insert(name, Arc::new(RateLimiter::new(policy)?));
        }
    } else {
        for (name, policy_config) in &config.admission.policies {
            let policy = policy_config.to_policy(name);
            limiters.insert(name.clone(), Arc::new(RateLimiter::new(policy)?));
        }
    }

    Ok(limiters)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_installs_presets() {
        let limiters = build_limiters(&GatehouseConfig::default()).unwrap();
        for name in ["general", "strict", "auth", "api"] {
            assert!(limiters.contains_key(name), "missing preset '{name}'");
        }
    }

    #[test]
    fn test_invalid_configured_policy_refuses_startup() {
        let config = GatehouseConfig::from_yaml(
            r#"
admission:
  policies:
    broken:
      max: 0
"#,
        )
        .unwrap();
        assert!(build_limiters(&config).is_err());
    }
}
