// ============================
// crates/backend-lib/src/routes/mod.rs
// ============================
//! HTTP routes. Every authenticated handler takes an [`Authenticated`] actor.
pub mod locations;
pub mod sos;
pub mod token;
pub mod walks;

use crate::error::AppError;
use crate::middleware::rate_limit;
use crate::validation::validate_id;
use crate::{ws_router, AppState};
use axum::{
    extract::{FromRequestParts, Path},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Json, Router,
};
use campus_safety_common::Actor;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sos", post(sos::trigger))
        .route("/api/sos/active", get(sos::active))
        .route("/api/sos/history", get(sos::history))
        .route("/api/sos/token/location", post(token::update_location))
        .route("/api/sos/token/cancel", post(token::cancel))
        .route("/api/sos/{id}", get(sos::get_one))
        .route("/api/sos/{id}/details", patch(sos::update_details))
        .route("/api/sos/{id}/recognise", post(sos::recognise))
        .route("/api/sos/{id}/acknowledge", post(sos::acknowledge))
        .route("/api/sos/{id}/resolve", post(sos::resolve))
        .route("/api/sos/{id}/cancel", post(sos::cancel))
        .route("/api/sos/{id}/location", post(sos::report_location))
        .route("/api/walks", post(walks::start))
        .route("/api/walks/active", get(walks::active))
        .route("/api/walks/{id}", get(walks::get_one))
        .route("/api/walks/{id}/status", post(walks::update_status))
        .route("/api/walks/{id}/location", post(walks::record_position))
        .route("/api/walks/{id}/escort", post(walks::assign_escort))
        .route("/api/walks/{id}/escort-request", post(walks::request_escort))
        .route("/api/walks/{id}/messages", post(walks::send_message))
        .route("/api/locations/{user_id}", get(locations::get_one))
        .merge(ws_router::routes())
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `?hostelId=` filter shared by the listing endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostelFilter {
    pub hostel_id: Option<String>,
}

/// The caller, resolved from `Authorization: Bearer <credential>`
#[derive(Debug, Clone)]
pub struct Authenticated(pub Actor);

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Auth("missing bearer credential".to_string()))?;
        let credential = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| AppError::Auth("malformed authorization header".to_string()))?;

        state.identity.verify(credential).await.map(Authenticated)
    }
}

/// A single `{id}` path segment that passed [`validate_id`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ValidId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;
        validate_id(&id)?;
        Ok(Self(id))
    }
}
