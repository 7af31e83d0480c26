//! Tower middleware that guards a router with a rate limit policy.
//!
//! The middleware is the in-process pipeline boundary: it asks the façade to
//! admit each request, attaches the rate headers to every response,
//! translates the rejection signal into a 429, and reports the terminal
//! status back for deferred accounting.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::admission::{ClientInfo, Principal, RateLimitExceeded, RateLimitOutcome, RateLimiter};

/// Proxy header carrying the original caller IP.
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Layer that applies a [`RateLimiter`] to every request of the wrapped
/// service.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    /// Guard a service with the given limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// The middleware service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let clone = self.inner.clone();
        // The clone holds the readiness we polled; swap it in.
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let client = client_info(&req);
            match limiter.admit(&client).await {
                Ok(admission) => {
                    let mut response = inner.call(req).await?;
                    limiter
                        .complete(&admission, response.status().as_u16())
                        .await;
                    apply_headers(response.headers_mut(), &admission.outcome);
                    Ok(response)
                }
                Err(denied) => Ok(rejection_response(&denied)),
            }
        })
    }
}

/// Caller identity for a request: forwarded IP, then the connection peer,
/// with the principal taken from the authentication layer's extension.
fn client_info(req: &Request<Body>) -> ClientInfo {
    let principal = req
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.0.clone());
    let ip = forwarded_ip(req.headers())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    ClientInfo { ip, principal }
}

/// First address in `X-Forwarded-For`, when a proxy supplied one.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Attach the outcome's rate headers to a response.
pub(crate) fn apply_headers(headers: &mut HeaderMap, outcome: &RateLimitOutcome) {
    for (name, value) in outcome.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// The 429 response for a rejection, carrying the configured message and the
/// retry guidance headers.
pub(crate) fn rejection_response(denied: &RateLimitExceeded) -> Response {
    let body = Json(serde_json::json!({ "error": denied.message }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    apply_headers(response.headers_mut(), &denied.outcome);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{KeySource, RateLimitPolicy};
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(policy: RateLimitPolicy) -> Router {
        let limiter = Arc::new(RateLimiter::new(policy).unwrap());
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter))
    }

    fn request(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/")
            .header(X_FORWARDED_FOR, ip)
            .body(Body::empty())
            .unwrap()
    }

    fn policy(max: u32) -> RateLimitPolicy {
        RateLimitPolicy::new("test")
            .with_max(max)
            .with_window(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_allowed_response_carries_rate_headers() {
        let app = app(policy(5));

        let response = app.oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "4");
        assert!(headers.contains_key("x-ratelimit-reset"));
        assert!(!headers.contains_key("retry-after"));
    }

    #[tokio::test]
    async fn test_exceeded_budget_yields_429_with_retry_guidance() {
        let app = app(policy(1).with_message("slow down"));

        let ok = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = app.oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers()["x-ratelimit-remaining"], "0");
        assert!(denied.headers().contains_key("retry-after"));

        let body = denied.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "slow down");
    }

    #[tokio::test]
    async fn test_distinct_forwarded_ips_have_distinct_budgets() {
        let app = app(policy(1));

        assert_eq!(
            app.clone().oneshot(request("10.0.0.1")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(request("10.0.0.1")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            app.oneshot(request("10.0.0.2")).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_successful_completions_release_budget_when_configured() {
        let app = app(policy(1).with_skip_successful_requests(true));

        // Well past the ceiling, every request is admitted: each 200
        // completion is uncounted.
        for _ in 0..4 {
            let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_principal_extension_drives_keying() {
        let limiter = Arc::new(
            RateLimiter::new(policy(1).with_key_source(KeySource::Principal)).unwrap(),
        );
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter));

        let authed = |ip: &str, user: &str| {
            Request::builder()
                .uri("/")
                .header(X_FORWARDED_FOR, ip)
                .extension(Principal(user.to_string()))
                .body(Body::empty())
                .unwrap()
        };

        // Same principal from two addresses shares one budget.
        assert_eq!(
            app.clone().oneshot(authed("10.0.0.1", "user-1")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(authed("10.0.0.2", "user-1")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            app.oneshot(authed("10.0.0.1", "user-2")).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[test]
    fn test_forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            forwarded_ip(&headers),
            Some("203.0.113.9".parse().unwrap())
        );

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("not-an-ip"));
        assert_eq!(forwarded_ip(&headers), None);
    }
}
