//! Unauthenticated SOS endpoints gated by the per-event token.
//! Repeated token failures lock a client out of that event for a while.
use super::sos::ResolutionResponse;
use crate::error::AppError;
use crate::middleware::ClientAddr;
use crate::validation::validate_id;
use crate::AppState;
use axum::{extract::State, Json};
use campus_safety_common::{Ack, TokenCancelRequest, TokenLocationUpdate};
use std::future::Future;
use std::sync::Arc;

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<TokenLocationUpdate>,
) -> Result<Json<Ack>, AppError> {
    validate_id(&request.sos_id)?;
    let key = lockout_key(&client, &request.sos_id);
    guarded(&state, &key, state.sos.update_location_with_token(request)).await?;
    Ok(Json(Ack::OK))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<TokenCancelRequest>,
) -> Result<Json<ResolutionResponse>, AppError> {
    validate_id(&request.sos_id)?;
    let key = lockout_key(&client, &request.sos_id);
    let resolution = guarded(&state, &key, state.sos.cancel_with_token(request)).await?;
    Ok(Json(resolution.into()))
}

/// Failures count per client and event, so guessing at one event never
/// blocks the owner of another
pub fn lockout_key(client: &str, sos_id: &str) -> String {
    format!("{client}|{sos_id}")
}

async fn guarded<T>(
    state: &AppState,
    key: &str,
    operation: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    if !state.token_limiter.check_rate_limit(key) {
        return Err(AppError::AuthRateLimited);
    }
    match operation.await {
        Ok(value) => {
            state.token_limiter.record_success(key);
            Ok(value)
        },
        Err(AppError::InvalidToken) => {
            state.token_limiter.record_failed_attempt(key);
            Err(AppError::InvalidToken)
        },
        Err(e) => Err(e),
    }
}
