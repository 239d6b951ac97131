// ============================
// crates/backend-lib/src/routes/locations.rs
// ============================
use super::{Authenticated, ValidId};
use crate::auth::{require_owner_or, Permission};
use crate::error::AppError;
use crate::AppState;
use axum::{extract::State, Json};
use campus_safety_common::FeedMessage;
use std::sync::Arc;

/// Last known position of a user with its freshness
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(user_id): ValidId,
) -> Result<Json<FeedMessage>, AppError> {
    require_owner_or(&actor, &user_id, Permission::MonitorSos)?;
    let location = state.locations.get(&user_id).await?;
    let status = location
        .as_ref()
        .map(|location| state.location_windows.status(location));
    Ok(Json(FeedMessage::Location {
        user_id,
        location,
        status,
    }))
}
