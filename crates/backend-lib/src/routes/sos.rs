// ============================
// crates/backend-lib/src/routes/sos.rs
// ============================
use super::{Authenticated, HostelFilter, ValidId};
use crate::error::AppError;
use crate::sos::Resolution;
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use campus_safety_common::{
    Ack, LocationFix, ResolveRequest, SosDetails, SosEvent, TriggerRequest, TriggerResponse,
};
use serde::Serialize;
use std::sync::Arc;

/// Body returned by resolve and cancel
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResponse {
    pub success: bool,
    pub already_resolved: bool,
}

impl From<Resolution> for ResolutionResponse {
    fn from(resolution: Resolution) -> Self {
        Self {
            success: true,
            already_resolved: resolution == Resolution::AlreadyResolved,
        }
    }
}

pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let response = state.sos.open(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn active(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    Query(filter): Query<HostelFilter>,
) -> Result<Json<Vec<SosEvent>>, AppError> {
    let events = state.sos.active(&actor, filter.hostel_id.as_deref()).await?;
    Ok(Json(events))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
) -> Result<Json<Vec<SosEvent>>, AppError> {
    Ok(Json(state.sos.history(&actor).await?))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<SosEvent>, AppError> {
    Ok(Json(state.sos.get(&actor, &id).await?))
}

pub async fn update_details(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(details): Json<SosDetails>,
) -> Result<Json<Ack>, AppError> {
    state.sos.update_details(&actor, &id, details).await?;
    Ok(Json(Ack::OK))
}

pub async fn recognise(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<Ack>, AppError> {
    state.sos.recognise(&actor, &id).await?;
    Ok(Json(Ack::OK))
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<Ack>, AppError> {
    state.sos.acknowledge(&actor, &id).await?;
    Ok(Json(Ack::OK))
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolutionResponse>, AppError> {
    let resolution = state.sos.resolve(&actor, &id, &request.summary).await?;
    Ok(Json(resolution.into()))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
) -> Result<Json<ResolutionResponse>, AppError> {
    let resolution = state.sos.cancel_by_owner(&actor, &id).await?;
    Ok(Json(resolution.into()))
}

pub async fn report_location(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    ValidId(id): ValidId,
    Json(fix): Json<LocationFix>,
) -> Result<Json<Ack>, AppError> {
    state.sos.report_location(&actor, &id, fix).await?;
    Ok(Json(Ack::OK))
}
