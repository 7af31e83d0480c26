//! Rate limit key derivation.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Key used by every shared-key policy. Using one key for all callers
/// deliberately disables per-caller isolation.
const SHARED_KEY: &str = "shared";

/// A key that identifies the budget a request is counted against.
///
/// Keys are opaque strings derived from caller identity. All concurrent
/// requests from the same caller map to the same key; distinct callers never
/// share a key unless the policy uses [`KeySource::Shared`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Create a key from any string-like identity.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The underlying key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The caller identity an admission check is performed for.
///
/// The request pipeline extracts this once per request; the admission
/// subsystem never inspects the request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// The caller's IP address.
    pub ip: IpAddr,
    /// The authenticated principal identifier, when the outer pipeline has
    /// established one.
    pub principal: Option<String>,
}

impl ClientInfo {
    /// Identity for an unauthenticated caller.
    pub fn anonymous(ip: IpAddr) -> Self {
        Self {
            ip,
            principal: None,
        }
    }

    /// Identity for an authenticated caller.
    pub fn authenticated(ip: IpAddr, principal: impl Into<String>) -> Self {
        Self {
            ip,
            principal: Some(principal.into()),
        }
    }
}

/// Request extension carrying the authenticated principal id.
///
/// An upstream authentication layer inserts this into the request extensions;
/// the middleware reads it when building [`ClientInfo`].
#[derive(Debug, Clone)]
pub struct Principal(pub String);

/// How a policy derives the rate limit key from caller identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Key by caller IP address (the default).
    #[default]
    Ip,
    /// Key by authenticated principal id, falling back to the IP address
    /// for unauthenticated callers.
    Principal,
    /// One shared key for all callers.
    Shared,
}

impl KeySource {
    /// Derive the rate limit key for a caller.
    pub fn derive(&self, client: &ClientInfo) -> RateLimitKey {
        match self {
            KeySource::Ip => RateLimitKey::new(client.ip.to_string()),
            KeySource::Principal => match &client.principal {
                Some(principal) => RateLimitKey::new(principal.clone()),
                None => RateLimitKey::new(client.ip.to_string()),
            },
            KeySource::Shared => RateLimitKey::new(SHARED_KEY),
        }
    }
}
