//! Device binding endpoints.
//!
//! A binding is the routing fact the dispatch path depends on: messages
//! for a device go to the server its session lives on, and nowhere else.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::registry::DeviceBinding;
use crate::selector::PlacementCriteria;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub device: String,
    /// Explicit target; when absent the best available server is picked
    pub server_id: Option<Uuid>,
}

#[tracing::instrument(name = "api.bind_device", skip(state, request), fields(device = %request.device))]
pub async fn bind_device(
    State(state): State<AppState>,
    Json(request): Json<BindRequest>,
) -> Result<(StatusCode, Json<DeviceBinding>)> {
    if request.device.trim().is_empty() {
        return Err(AppError::Validation("device is required".into()));
    }

    let server_id = match request.server_id {
        Some(id) => id,
        None => state
            .selector
            .pick_best_available(&PlacementCriteria::default())
            .ok_or_else(|| {
                AppError::NotFound("no backend server available for placement".to_string())
            })?
            .id,
    };

    let binding = state.registry.bind_device(&request.device, server_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

pub async fn get_binding(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<DeviceBinding>> {
    state
        .registry
        .binding(&device)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("binding for device {device}")))
}

#[tracing::instrument(name = "api.unbind_device", skip(state))]
pub async fn unbind_device(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<StatusCode> {
    state.registry.unbind_device(&device).await?;
    Ok(StatusCode::NO_CONTENT)
}
