// ============================
// crates/backend-lib/src/auth/token_generator.rs
// ============================
//! Random SOS session tokens.
//!
//! A token is the only credential a signed-out device holds for its SOS, so
//! it has to stay unguessable for the whole session lifetime.
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// 256 bits
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Never issue fewer than 128 bits, whatever the caller asks for
pub const MIN_TOKEN_BYTES: usize = 16;

/// `bytes` of OS randomness, URL-safe base64 without padding
pub fn sos_token(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes.max(MIN_TOKEN_BYTES)];
    OsRng.fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}
