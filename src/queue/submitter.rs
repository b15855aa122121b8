//! Enqueue orchestration: validation, credit gating, bulk submission.
//!
//! Bulk submission is all-or-nothing against the credit pools: when the
//! tenant cannot cover the full batch the whole call is rejected with a
//! shortfall breakdown and no rows are created. Credit is not reserved at
//! enqueue time; the actual deduction happens per message after a confirmed
//! dispatch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::{CreditError, CreditLedger};
use crate::error::{AppError, Result};

use super::models::{MessageKind, NewMessage};
use super::store::QueueStore;

/// One item of a bulk submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitItem {
    pub destination: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkEnqueueRequest {
    pub tenant_id: String,
    pub device: String,
    pub messages: Vec<SubmitItem>,
}

/// Per-item outcome of a bulk submission.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkEnqueueResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub items: Vec<ItemOutcome>,
    /// Credit units still available after the batch was accepted
    pub remaining_credit: i64,
    /// count x inter-message delay, the earliest the batch can drain
    pub estimated_completion_seconds: u64,
}

/// Validates and enqueues messages on behalf of the API surface.
pub struct MessageSubmitter {
    store: Arc<dyn QueueStore>,
    ledger: Arc<dyn CreditLedger>,
    max_batch_size: usize,
    message_delay_ms: u64,
}

impl MessageSubmitter {
    pub fn new(
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn CreditLedger>,
        max_batch_size: usize,
        message_delay_ms: u64,
    ) -> Self {
        Self {
            store,
            ledger,
            max_batch_size,
            message_delay_ms,
        }
    }

    /// Enqueue a single message. Validation and credit-availability errors
    /// are rejected synchronously; nothing invalid enters the queue.
    #[tracing::instrument(
        name = "submitter.submit",
        skip(self, message),
        fields(tenant_id = %message.tenant_id, device = %message.device)
    )]
    pub async fn submit(&self, message: NewMessage) -> Result<Uuid> {
        validate(&message.device, &message.destination, message.kind, &message.body, &message.attachment_url)?;
        self.ensure_credit(&message.tenant_id, 1).await?;

        let id = self.store.enqueue(message).await?;
        Ok(id)
    }

    /// Enqueue a bulk batch. Rejects the whole call when the batch exceeds
    /// the cap or the tenant's credit cannot cover every message.
    #[tracing::instrument(
        name = "submitter.submit_bulk",
        skip(self, request),
        fields(tenant_id = %request.tenant_id, device = %request.device, count = request.messages.len())
    )]
    pub async fn submit_bulk(&self, request: BulkEnqueueRequest) -> Result<BulkEnqueueResponse> {
        if request.messages.is_empty() {
            return Err(AppError::Validation("bulk request contains no messages".into()));
        }
        if request.messages.len() > self.max_batch_size {
            return Err(AppError::Validation(format!(
                "bulk request exceeds maximum of {} messages",
                self.max_batch_size
            )));
        }
        if request.device.trim().is_empty() {
            return Err(AppError::Validation("device is required".into()));
        }

        // Fail fast before any row is queued
        self.ensure_credit(&request.tenant_id, request.messages.len() as i64)
            .await?;

        let mut items = Vec::with_capacity(request.messages.len());
        let mut accepted = 0;
        let mut rejected = 0;

        for (index, item) in request.messages.into_iter().enumerate() {
            let outcome = match validate(
                &request.device,
                &item.destination,
                item.kind,
                &item.body,
                &item.attachment_url,
            ) {
                Ok(()) => {
                    let message = NewMessage {
                        tenant_id: request.tenant_id.clone(),
                        device: request.device.clone(),
                        destination: item.destination,
                        kind: item.kind,
                        body: item.body,
                        attachment_url: item.attachment_url,
                        filename: item.filename,
                        priority: item.priority,
                        not_before: item.not_before,
                    };
                    match self.store.enqueue(message).await {
                        Ok(id) => {
                            accepted += 1;
                            ItemOutcome {
                                index,
                                accepted: true,
                                message_id: Some(id),
                                error: None,
                            }
                        }
                        Err(e) => {
                            rejected += 1;
                            ItemOutcome {
                                index,
                                accepted: false,
                                message_id: None,
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
                Err(e) => {
                    rejected += 1;
                    ItemOutcome {
                        index,
                        accepted: false,
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            items.push(outcome);
        }

        let remaining_credit = self
            .ledger
            .pool(&request.tenant_id)
            .await
            .map(|p| p.total_available())
            .unwrap_or(0);

        let estimated_completion_seconds = (accepted as u64 * self.message_delay_ms) / 1000;

        tracing::info!(
            tenant_id = %request.tenant_id,
            accepted = accepted,
            rejected = rejected,
            remaining_credit = remaining_credit,
            "Bulk batch enqueued"
        );

        Ok(BulkEnqueueResponse {
            accepted,
            rejected,
            items,
            remaining_credit,
            estimated_completion_seconds,
        })
    }

    async fn ensure_credit(&self, tenant_id: &str, count: i64) -> Result<()> {
        let pool = self.ledger.pool(tenant_id).await.map_err(|e| match e {
            CreditError::UnknownTenant(t) => AppError::NotFound(format!("tenant {t}")),
            other => AppError::Internal(other.to_string()),
        })?;

        if pool.total_available() < count {
            return Err(AppError::InsufficientCredit(crate::credit::CreditShortfall {
                requested: count,
                subscription_remaining: pool.subscription_remaining(),
                voucher_remaining: pool.voucher_balance,
            }));
        }
        Ok(())
    }
}

fn validate(
    device: &str,
    destination: &str,
    kind: MessageKind,
    body: &str,
    attachment_url: &Option<String>,
) -> Result<()> {
    if device.trim().is_empty() {
        return Err(AppError::Validation("device is required".into()));
    }
    if destination.trim().is_empty() {
        return Err(AppError::Validation("destination is required".into()));
    }
    match kind {
        MessageKind::Text => {
            if body.trim().is_empty() {
                return Err(AppError::Validation("body is required for text messages".into()));
            }
        }
        _ => {
            if attachment_url.as_deref().unwrap_or("").trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "attachment_url is required for {} messages",
                    kind.as_str()
                )));
            }
        }
    }
    Ok(())
}
