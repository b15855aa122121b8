use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::error::Result;
use crate::metrics::encode_metrics;
use crate::processor::compute_queue_stats;
use crate::queue::QueueStats;
use crate::registry::ServerStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub processor: String,
    pub backends_active: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub processor: ProcessorStats,
    pub backends: BackendStats,
}

#[derive(Debug, Serialize)]
pub struct ProcessorStats {
    pub paused: bool,
    pub cycle_interval_seconds: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub message_delay_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct BackendStats {
    pub total: usize,
    pub active: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.counts().await {
        Ok(_) => "up",
        Err(_) => "down",
    };
    let processor = if state.processor_control.is_paused() {
        "paused"
    } else {
        "running"
    };
    let backends_active = state
        .registry
        .list()
        .iter()
        .filter(|s| s.status == ServerStatus::Active)
        .count();

    let status = if database == "up" { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        processor: processor.to_string(),
        backends_active,
    })
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let settings = state.processor_control.settings();
    let queue = compute_queue_stats(state.store.as_ref(), &settings).await?;

    let servers = state.registry.list();
    let active = servers
        .iter()
        .filter(|s| s.status == ServerStatus::Active)
        .count();

    Ok(Json(StatsResponse {
        queue,
        processor: ProcessorStats {
            paused: state.processor_control.is_paused(),
            cycle_interval_seconds: settings.cycle_interval_seconds,
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
            message_delay_ms: settings.message_delay_ms,
        },
        backends: BackendStats {
            total: servers.len(),
            active,
        },
    }))
}

pub async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response()
        }
    }
}
