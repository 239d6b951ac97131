// ============================
// crates/backend-lib/src/middleware/rate_limit.rs
// ============================
use crate::{error::AppError, AppState};
use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, Extensions, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-window request counter keyed by client address
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    max_requests: u32,
    window: Duration,
}

/// Rate limit entry for a client
#[derive(Debug)]
struct RateLimitEntry {
    requests: u32,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count one request; false once the client is over its budget for the window
    pub fn check(&self, client: &str) -> bool {
        let mut entry = self
            .entries
            .entry(client.to_string())
            .or_insert_with(|| RateLimitEntry {
                requests: 0,
                window_start: Instant::now(),
            });

        if entry.window_start.elapsed() > self.window {
            entry.requests = 0;
            entry.window_start = Instant::now();
        }

        if entry.requests >= self.max_requests {
            return false;
        }
        entry.requests += 1;
        true
    }

    /// Drop clients whose window has passed
    pub fn cleanup(&self) {
        let window = self.window;
        self.entries
            .retain(|_, entry| entry.window_start.elapsed() <= window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.len()
    }
}

/// Client address: proxy headers when they are trusted, otherwise the TCP peer
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    let forwarded = if trust_proxy_headers {
        forwarded_ip(headers)
    } else {
        None
    };
    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|list| list.split(',').next())
        })
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// The caller's address as the limiters see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl FromRequestParts<Arc<AppState>> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(
            &parts.headers,
            peer_addr(&parts.extensions),
            state.settings.trust_proxy_headers,
        )))
    }
}

/// Rate limiter middleware
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_ip(
        request.headers(),
        peer_addr(request.extensions()),
        state.settings.trust_proxy_headers,
    );
    if !state.rate_limiter.check(&client) {
        tracing::warn!(%client, path = %request.uri().path(), "rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }
    Ok(next.run(request).await)
}
