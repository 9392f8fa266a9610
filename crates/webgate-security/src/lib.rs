//! Admission control and input hygiene for the gateway.
//!
//! Three gates sit in front of every command: the authenticator (shared
//! secret, constant-time comparison), the per-client sliding-window rate
//! limiter, and the input sanitizer that refuses script-injection patterns
//! before anything reaches a browser page.

pub mod auth;
pub mod rate_limit;
pub mod sanitizer;

pub use auth::Authenticator;
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use sanitizer::{InputSanitizer, RejectionCategory, SanitizeError, SanitizerConfig};
