//! Processor runtime controls.
//!
//! Pause stops claiming at the next cycle; messages already claimed still
//! run to completion. Settings changes apply deterministically at the next
//! cycle, never mid-batch.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::config::ProcessorSettings;
use crate::error::Result;
use crate::processor::ProcessorSettingsUpdate;
use crate::queue::MessageStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ProcessorStateResponse {
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    /// Statuses to purge. PROCESSING rows are never clearable.
    #[serde(default = "default_clear_statuses")]
    pub statuses: Vec<MessageStatus>,
}

fn default_clear_statuses() -> Vec<MessageStatus> {
    vec![MessageStatus::Pending, MessageStatus::Failed]
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

pub async fn pause_processor(State(state): State<AppState>) -> Json<ProcessorStateResponse> {
    state.processor_control.pause();
    Json(ProcessorStateResponse { paused: true })
}

pub async fn resume_processor(State(state): State<AppState>) -> Json<ProcessorStateResponse> {
    state.processor_control.resume();
    Json(ProcessorStateResponse { paused: false })
}

pub async fn get_settings(State(state): State<AppState>) -> Json<ProcessorSettings> {
    Json(state.processor_control.settings())
}

#[tracing::instrument(name = "api.update_settings", skip(state, update))]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<ProcessorSettingsUpdate>,
) -> Json<ProcessorSettings> {
    Json(state.processor_control.update_settings(update))
}

/// Purge messages by status. In-flight PROCESSING rows are excluded.
#[tracing::instrument(name = "api.clear_queue", skip(state, request))]
pub async fn clear_queue(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> Result<Json<ClearResponse>> {
    let statuses: Vec<MessageStatus> = request
        .statuses
        .into_iter()
        .filter(|s| *s != MessageStatus::Processing)
        .collect();

    let removed = state.store.purge(&statuses).await?;
    tracing::info!(removed, "Queue cleared");
    Ok(Json(ClearResponse { removed }))
}
