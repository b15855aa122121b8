//! Message submission and inspection endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::QUEUE_REQUEUED_TOTAL;
use crate::queue::{BulkEnqueueRequest, BulkEnqueueResponse, MessageStatus, NewMessage, QueuedMessage, SentLogEntry};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<MessageStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct SentLogQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Enqueue a single message
#[tracing::instrument(name = "api.submit_message", skip(state, request), fields(tenant_id = %request.tenant_id))]
pub async fn submit_message(
    State(state): State<AppState>,
    Json(request): Json<NewMessage>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let message_id = state.submitter.submit(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            success: true,
            message_id,
            timestamp: Utc::now(),
        }),
    ))
}

/// Enqueue a bulk batch, all-or-nothing against the tenant's credit
#[tracing::instrument(name = "api.submit_bulk", skip(state, request), fields(tenant_id = %request.tenant_id, count = request.messages.len()))]
pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkEnqueueRequest>,
) -> Result<(StatusCode, Json<BulkEnqueueResponse>)> {
    let response = state.submitter.submit_bulk(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// List queued messages, newest first
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<QueuedMessage>>> {
    let messages = state.store.list(query.status, query.limit.min(1000)).await?;
    Ok(Json(messages))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueuedMessage>> {
    let message = state.store.get(id).await?;
    Ok(Json(message))
}

/// Manually retry a failed message: back to PENDING with attempts reset
#[tracing::instrument(name = "api.requeue_message", skip(state))]
pub async fn requeue_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueuedMessage>> {
    state.store.requeue(id).await?;
    QUEUE_REQUEUED_TOTAL.inc();

    let message = state.store.get(id).await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Recent confirmed deliveries
pub async fn sent_log(
    State(state): State<AppState>,
    Query(query): Query<SentLogQuery>,
) -> Result<Json<Vec<SentLogEntry>>> {
    let entries = state.store.sent_log(query.limit.min(1000)).await?;
    Ok(Json(entries))
}
