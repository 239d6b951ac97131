// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the campus safety server: the SOS
//! lifecycle, live location, safe walk monitoring and their HTTP surface.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod local_store;
pub mod location;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod safewalk;
pub mod sos;
pub mod store;
pub mod validation;
pub mod ws_router;

use crate::auth::{AuthRateLimiter, IdentityProvider, SessionTokens, StaticIdentityProvider};
use crate::config::Settings;
use crate::events::EventBus;
use crate::location::{LocationStore, LocationWindows, MemoryLocationStore};
use crate::middleware::RateLimiter;
use crate::safewalk::SafeWalkMonitor;
use crate::sos::SosService;
use crate::store::{DocumentStore, MemoryDocumentStore};
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings the state was built from
    pub settings: Arc<Settings>,
    /// Document store backing SOS events, sessions, walks and profiles
    pub store: Arc<dyn DocumentStore>,
    /// Realtime last-known positions
    pub locations: Arc<dyn LocationStore>,
    pub location_windows: LocationWindows,
    /// Bearer credential verification
    pub identity: Arc<dyn IdentityProvider>,
    pub sos: Arc<SosService>,
    pub walks: Arc<SafeWalkMonitor>,
    /// Per-client request budget
    pub rate_limiter: Arc<RateLimiter>,
    /// Lockout for repeated SOS token failures
    pub token_limiter: AuthRateLimiter,
}

impl AppState {
    /// Create a new application state over the given stores
    pub fn new(
        settings: Settings,
        store: Arc<dyn DocumentStore>,
        locations: Arc<dyn LocationStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let tokens = SessionTokens::new(store.clone())
            .with_ttl(settings.sos.session_ttl())
            .with_token_bytes(settings.sos.token_bytes);
        let sos = Arc::new(SosService::new(
            store.clone(),
            locations.clone(),
            tokens,
            EventBus::new(),
        ));
        let walks = Arc::new(
            SafeWalkMonitor::new(store.clone(), locations.clone(), sos.clone())
                .with_off_route_threshold(settings.safe_walk.off_route_threshold_m),
        );
        let location_windows = LocationWindows {
            active: settings.location.active_window(),
            stale: settings.location.stale_window(),
        };
        let rate_limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(settings.rate_limit.window_secs),
            settings.rate_limit.max_requests,
        ));
        let token_limiter = AuthRateLimiter::new(
            settings.rate_limit.max_token_failures,
            Duration::from_secs(settings.rate_limit.lockout_secs),
        );

        Self {
            settings: Arc::new(settings),
            store,
            locations,
            location_windows,
            identity,
            sos,
            walks,
            rate_limiter,
            token_limiter,
        }
    }

    /// In-memory stores and the static identity table from settings
    pub fn in_memory(settings: Settings) -> Self {
        let identity = Arc::new(StaticIdentityProvider::from_settings(&settings.identities));
        Self::new(
            settings,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryLocationStore::new()),
            identity,
        )
    }

    pub fn events(&self) -> &EventBus {
        self.sos.events()
    }
}
