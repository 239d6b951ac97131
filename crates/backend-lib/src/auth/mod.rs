// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication and authorization.

pub mod identity;
pub mod policy;
pub mod rate_limit;
pub mod session;
pub mod token_generator;

pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use policy::{permits, require, require_owner, require_owner_or, Permission};
pub use rate_limit::AuthRateLimiter;
pub use session::{SessionTokens, SESSION_TTL_HOURS};
pub use token_generator::{sos_token, DEFAULT_TOKEN_BYTES, MIN_TOKEN_BYTES};
