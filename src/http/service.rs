//! Remote admission-check service implementation.
//!
//! For pipelines that cannot link the façade in-process: `POST /v1/check`
//! performs one admission check against a named policy, and
//! `POST /v1/complete` reports a request's terminal status for deferred
//! accounting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::layer::{apply_headers, rejection_response};
use crate::admission::{ClientInfo, RateLimiter};

/// Registry of named limiters exposed over HTTP.
#[derive(Clone)]
pub struct AdmissionService {
    limiters: Arc<HashMap<String, Arc<RateLimiter>>>,
}

impl AdmissionService {
    /// Create a service from a named-limiter registry.
    pub fn new(limiters: HashMap<String, Arc<RateLimiter>>) -> Self {
        Self {
            limiters: Arc::new(limiters),
        }
    }

    /// Look up a limiter by policy name.
    pub fn limiter(&self, name: &str) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(name)
    }

    /// The routes this service serves.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/check", post(check))
            .route("/v1/complete", post(complete))
            .with_state(self.clone())
    }
}

/// One admission check against a named policy.
#[derive(Debug, Deserialize)]
struct CheckRequest {
    /// Name of the policy to check against.
    policy: String,
    /// The caller's IP address.
    ip: IpAddr,
    /// The authenticated principal, when known.
    #[serde(default)]
    principal: Option<String>,
}

/// A request's terminal status, reported after a remote check.
#[derive(Debug, Deserialize)]
struct CompleteRequest {
    policy: String,
    ip: IpAddr,
    #[serde(default)]
    principal: Option<String>,
    /// The HTTP status the request finished with.
    status: u16,
}

fn unknown_policy(name: &str) -> Response {
    warn!(policy = %name, "Request for unknown policy");
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown policy '{name}'") })),
    )
        .into_response()
}

/// Decide whether rate limiting should take place for one request.
#[instrument(skip_all, fields(policy = %req.policy, ip = %req.ip))]
async fn check(
    State(service): State<AdmissionService>,
    Json(req): Json<CheckRequest>,
) -> Response {
    let Some(limiter) = service.limiter(&req.policy) else {
        return unknown_policy(&req.policy);
    };

    let client = ClientInfo {
        ip: req.ip,
        principal: req.principal,
    };

    match limiter.admit(&client).await {
        Ok(admission) => {
            debug!(
                allowed = true,
                remaining = admission.outcome.remaining,
                "Admission decision made"
            );
            let mut response = (StatusCode::OK, Json(&admission.outcome)).into_response();
            apply_headers(response.headers_mut(), &admission.outcome);
            response
        }
        Err(denied) => {
            debug!(
                allowed = false,
                retry_after_secs = denied.retry_after_secs(),
                "Admission decision made"
            );
            rejection_response(&denied)
        }
    }
}

/// Settle deferred accounting for a remotely checked request.
#[instrument(skip_all, fields(policy = %req.policy, ip = %req.ip, status = req.status))]
async fn complete(
    State(service): State<AdmissionService>,
    Json(req): Json<CompleteRequest>,
) -> Response {
    let Some(limiter) = service.limiter(&req.policy) else {
        return unknown_policy(&req.policy);
    };

    let client = ClientInfo {
        ip: req.ip,
        principal: req.principal,
    };
    limiter.report_completion(&client, req.status).await;
    StatusCode::NO_CONTENT.into_response()
}
