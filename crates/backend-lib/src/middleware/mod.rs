// crates/backend-lib/src/middleware/mod.rs

//! Middleware for the campus safety HTTP surface.

pub mod rate_limit;

pub use rate_limit::{client_ip, rate_limit, ClientAddr, RateLimiter};
