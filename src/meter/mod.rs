//! Shared fixed-window rate limiting.

pub mod rate_limit;

pub use rate_limit::FixedWindowLimiter;
