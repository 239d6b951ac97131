// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Lockout for repeated SOS token failures on the unauthenticated surface.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of failed attempts before lockout
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout duration (5 minutes)
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

/// How long failures are remembered when no lockout happened
const FAILURE_MEMORY: Duration = Duration::from_secs(24 * 60 * 60);

/// Entry in the rate limit map
#[derive(Debug, Clone)]
struct RateLimitEntry {
    /// Number of failed attempts
    failed_attempts: u32,
    /// Time of the last failed attempt
    last_failure: Instant,
    /// When the lockout expires, if locked out
    lockout_expiry: Option<Instant>,
}

/// Rate limiter for token checks, keyed by client address
#[derive(Debug, Clone)]
pub struct AuthRateLimiter {
    attempts: Arc<DashMap<String, RateLimitEntry>>,
    max_attempts: u32,
    lockout_duration: Duration,
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_LOCKOUT_DURATION)
    }
}

impl AuthRateLimiter {
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts,
            lockout_duration,
        }
    }

    /// Record a rejected token
    pub fn record_failed_attempt(&self, client: &str) {
        let now = Instant::now();

        let mut entry = self
            .attempts
            .entry(client.to_string())
            .or_insert_with(|| RateLimitEntry {
                failed_attempts: 0,
                last_failure: now,
                lockout_expiry: None,
            });

        // Reset once a previous lockout has run out
        if entry.lockout_expiry.is_some_and(|expiry| now >= expiry) {
            entry.failed_attempts = 0;
            entry.lockout_expiry = None;
        }

        entry.failed_attempts += 1;
        entry.last_failure = now;

        if entry.failed_attempts >= self.max_attempts && entry.lockout_expiry.is_none() {
            entry.lockout_expiry = Some(now + self.lockout_duration);
            tracing::warn!(
                client,
                attempts = entry.failed_attempts,
                "client locked out after repeated SOS token failures"
            );
        }
    }

    /// Record an accepted token
    pub fn record_success(&self, client: &str) {
        self.attempts.remove(client);
    }

    /// Whether the client may attempt another token check
    pub fn check_rate_limit(&self, client: &str) -> bool {
        self.attempts.get(client).map_or(true, |entry| {
            entry
                .lockout_expiry
                .map_or(true, |expiry| Instant::now() >= expiry)
        })
    }

    /// Drop expired lockouts and stale failure counts
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.attempts.retain(|_, entry| match entry.lockout_expiry {
            Some(expiry) => now < expiry,
            None => now.duration_since(entry.last_failure) < FAILURE_MEMORY,
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.attempts.len()
    }
}
