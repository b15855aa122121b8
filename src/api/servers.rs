//! Backend server registry endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::registry::{BackendServer, ServerConfig, ServerStatus};
use crate::selector::PlacementCriteria;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub server_id: Uuid,
    pub status: ServerStatus,
    pub checked_at: DateTime<Utc>,
}

pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<BackendServer>> {
    Json(state.registry.list())
}

#[tracing::instrument(name = "api.create_server", skip(state, config), fields(name = %config.name))]
pub async fn create_server(
    State(state): State<AppState>,
    Json(config): Json<ServerConfig>,
) -> Result<(StatusCode, Json<BackendServer>)> {
    validate_config(&config)?;
    let server = state.registry.add_server(config).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackendServer>> {
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("server {id}")))
}

#[tracing::instrument(name = "api.update_server", skip(state, config))]
pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(config): Json<ServerConfig>,
) -> Result<Json<BackendServer>> {
    validate_config(&config)?;
    let server = state.registry.update_server(id, config).await?;
    Ok(Json(server))
}

#[tracing::instrument(name = "api.delete_server", skip(state))]
pub async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.registry.remove_server(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// On-demand health probe, outside the monitor's cadence
#[tracing::instrument(name = "api.check_server", skip(state))]
pub async fn check_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckResponse>> {
    let server = state
        .registry
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("server {id}")))?;

    let status = state.prober.probe_and_apply(&state.registry, &server).await?;

    Ok(Json(CheckResponse {
        server_id: id,
        status,
        checked_at: Utc::now(),
    }))
}

/// Best placement candidate under the given criteria
pub async fn select_server(
    State(state): State<AppState>,
    Json(criteria): Json<PlacementCriteria>,
) -> Result<Json<BackendServer>> {
    state
        .selector
        .pick_best_available(&criteria)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no backend server available for placement".to_string()))
}

fn validate_config(config: &ServerConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".into()));
    }
    if !config.address.starts_with("http://") && !config.address.starts_with("https://") {
        return Err(AppError::Validation(
            "address must be an http(s) base URL".into(),
        ));
    }
    if config.max_instances <= 0 || config.max_users_per_instance <= 0 {
        return Err(AppError::Validation(
            "max_instances and max_users_per_instance must be positive".into(),
        ));
    }
    Ok(())
}
