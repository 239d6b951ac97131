// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use crate::auth::MIN_TOKEN_BYTES;
use anyhow::{bail, Result};
use campus_safety_common::ActorRole;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;


/// Environment variable prefix, nested keys split on `__`
pub const ENV_PREFIX: &str = "CAMPUS_SAFETY_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Longest accepted SOS session lifetime (one year)
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    /// Key clients on `X-Real-IP` / `X-Forwarded-For`; only behind a proxy that sets them
    pub trust_proxy_headers: bool,
    pub sos: SosSettings,
    pub safe_walk: SafeWalkSettings,
    pub location: LocationSettings,
    pub rate_limit: RateLimitSettings,
    /// Static identity table used in place of an external auth provider
    pub identities: Vec<DevIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SosSettings {
    /// Session lifetime in seconds; `0` or `None` disables expiry
    pub session_ttl_secs: Option<u64>,
    /// Random bytes per generated token
    pub token_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeWalkSettings {
    pub off_route_threshold_m: f64,
    pub delay_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub active_window_secs: u64,
    pub stale_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub max_token_failures: u32,
    pub lockout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevIdentity {
    pub token: String,
    pub id: String,
    pub name: String,
    pub role: ActorRole,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            trust_proxy_headers: false,
            sos: SosSettings::default(),
            safe_walk: SafeWalkSettings::default(),
            location: LocationSettings::default(),
            rate_limit: RateLimitSettings::default(),
            identities: Vec::new(),
        }
    }
}

impl Default for SosSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: Some(48 * 60 * 60), // 48 hours
            token_bytes: 32,
        }
    }
}

impl Default for SafeWalkSettings {
    fn default() -> Self {
        Self {
            off_route_threshold_m: 20.0,
            delay_check_interval_secs: 60,
        }
    }
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            active_window_secs: 30,
            stale_window_secs: 5 * 60,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
            max_token_failures: 5,
            lockout_secs: 5 * 60,
        }
    }
}

impl SosSettings {
    pub fn session_ttl(&self) -> Option<chrono::Duration> {
        let secs = self.session_ttl_secs.filter(|secs| *secs > 0)?;
        let secs = i64::try_from(secs.min(MAX_SESSION_TTL_SECS)).ok()?;
        chrono::Duration::try_seconds(secs)
    }
}

impl LocationSettings {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_window_secs)
    }
}

impl Settings {
    /// Load from `config.toml` in the working directory plus the environment
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from an explicit TOML file plus the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the service misbehave
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!("invalid log level: {}", self.log_level);
        }
        if self
            .sos
            .session_ttl_secs
            .is_some_and(|secs| secs > MAX_SESSION_TTL_SECS)
        {
            bail!("sos.session_ttl_secs must be at most {MAX_SESSION_TTL_SECS} (0 disables expiry)");
        }
        if self.sos.token_bytes < MIN_TOKEN_BYTES {
            bail!("sos.token_bytes must be at least {MIN_TOKEN_BYTES}");
        }
        if !(self.safe_walk.off_route_threshold_m.is_finite()
            && self.safe_walk.off_route_threshold_m > 0.0)
        {
            bail!("safe_walk.off_route_threshold_m must be a positive number");
        }
        if self.safe_walk.delay_check_interval_secs == 0 {
            bail!("safe_walk.delay_check_interval_secs must be positive");
        }
        if self.location.active_window_secs == 0 {
            bail!("location.active_window_secs must be positive");
        }
        if self.location.stale_window_secs <= self.location.active_window_secs {
            bail!("location.stale_window_secs must exceed location.active_window_secs");
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            bail!("rate_limit.max_requests and rate_limit.window_secs must be positive");
        }
        if self.rate_limit.max_token_failures == 0 {
            bail!("rate_limit.max_token_failures must be positive");
        }
        Ok(())
    }
}
