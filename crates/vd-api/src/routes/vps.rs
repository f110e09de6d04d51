use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::dto::{CreateVpsRequest, CreatedVpsResponse, VpsResponse};
use crate::error::ApiError;
use crate::lifecycle;
use crate::state::AppState;

pub async fn create_vps(
    State(state): State<AppState>,
    Json(req): Json<CreateVpsRequest>,
) -> Result<(StatusCode, Json<CreatedVpsResponse>), ApiError> {
    let created = lifecycle::create_vps(&state, req.into()).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list_vps(State(state): State<AppState>) -> Json<Vec<VpsResponse>> {
    let records = state.store.list_all().await;
    Json(records.into_iter().map(VpsResponse::from).collect())
}

pub async fn get_vps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VpsResponse>, ApiError> {
    let record = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no VPS with id {id}")))?;
    Ok(Json(record.into()))
}

pub async fn suspend_vps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VpsResponse>, ApiError> {
    let record = lifecycle::suspend_vps(&state, &id).await?;
    Ok(Json(record.into()))
}

pub async fn resume_vps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VpsResponse>, ApiError> {
    let record = lifecycle::resume_vps(&state, &id).await?;
    Ok(Json(record.into()))
}

pub async fn regenerate_vps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VpsResponse>, ApiError> {
    let record = lifecycle::regenerate_vps(&state, &id).await?;
    Ok(Json(record.into()))
}
