// ============================
// crates/backend-lib/src/routes/walks.rs
// ============================
use super::{Authenticated, HostelFilter, ValidId};
use crate::error::AppError;
use crate::safewalk::StatusChange;
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use campus_safety_common::{
    Ack, AssignEscortRequest, LocationFix, OffRouteCheck, SafeWalkSession, StartWalkRequest,
    WalkMessageRequest, WalkStatusRequest,
};
use std::sync::Arc;

pub async fn start(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    Json(request): Json<StartWalkRequest>,
) -> Result<(StatusCode, Json<SafeWalkSession>), AppError> {
    let walk = state.walks.start(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(walk)))
}

pub async fn active(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    Query(filter): Query<HostelFilter>,
) -> Result<Json<Vec<SafeWalkSession>>, AppError> {
    Ok(Json(
        state
            .walks
            .active(&actor, filter.hostel_id.as_deref())
            .await?,
    ))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<SafeWalkSession>, AppError> {
    Ok(Json(state.walks.get(&actor, &id).await?))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(request): Json<WalkStatusRequest>,
) -> Result<Json<StatusChange>, AppError> {
    Ok(Json(state.walks.update_status(&actor, &id, request).await?))
}

pub async fn record_position(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(fix): Json<LocationFix>,
) -> Result<Json<OffRouteCheck>, AppError> {
    Ok(Json(state.walks.record_position(&actor, &id, fix).await?))
}

pub async fn assign_escort(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(request): Json<AssignEscortRequest>,
) -> Result<Json<Ack>, AppError> {
    state
        .walks
        .assign_escort(&actor, &id, &request.escort_name)
        .await?;
    Ok(Json(Ack::OK))
}

pub async fn request_escort(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<Ack>, AppError> {
    state.walks.request_escort(&actor, &id).await?;
    Ok(Json(Ack::OK))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(request): Json<WalkMessageRequest>,
) -> Result<Json<Ack>, AppError> {
    state
        .walks
        .send_message(&actor, &id, &request.message)
        .await?;
    Ok(Json(Ack::OK))
}
