//! HTTP surface: the middleware layer and the remote admission-check API.

mod layer;
mod server;
mod service;

pub use layer::{RateLimitLayer, RateLimitService};
pub use server::HttpServer;
pub use service::AdmissionService;
