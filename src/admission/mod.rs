//! Request admission control: windowed rate limiting and state management.
//!
//! The façade ([`RateLimiter`]) derives a key from caller identity and asks
//! a window-counting algorithm ([`FixedWindowLimiter`] or
//! [`SlidingWindowLimiter`]) to admit or reject; rejections surface as the
//! [`RateLimitExceeded`] signal the pipeline boundary turns into a 429.

mod backend;
mod fixed;
mod key;
mod limiter;
mod outcome;
mod policy;
mod sliding;
mod store;

pub use backend::AdmissionBackend;
pub use fixed::{FixedWindowLimiter, WindowRecord};
pub use key::{ClientInfo, KeySource, Principal, RateLimitKey};
pub use limiter::{Admission, RateLimiter};
pub use outcome::{
    RateLimitExceeded, RateLimitOutcome, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use policy::{Algorithm, RateLimitPolicy, SkipPredicate, DEFAULT_MAX, DEFAULT_MESSAGE, DEFAULT_WINDOW};
pub use sliding::{RequestLog, SlidingWindowLimiter};
pub use store::{Sweeper, WindowState, WindowStore};
