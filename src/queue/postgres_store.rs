//! PostgreSQL-based queue store.
//!
//! Messages live in a single table; the batch claim uses
//! `FOR UPDATE SKIP LOCKED` so concurrent processor replicas never receive
//! the same row.
//!
//! Table structure:
//! - `message_queue` - outbound messages with lifecycle state
//! - `sent_log` - append-only record of confirmed deliveries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::metrics::QUEUE_ENQUEUED_TOTAL;

use super::models::{MessageKind, MessageStatus, NewMessage, QueueCounts, QueuedMessage, SentLogEntry};
use super::store::{QueueStore, QueueStoreError};

pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    tenant_id: String,
    device: String,
    destination: String,
    kind: String,
    body: String,
    attachment_url: Option<String>,
    filename: Option<String>,
    server_id: Option<Uuid>,
    priority: i32,
    not_before: Option<DateTime<Utc>>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<MessageRow> for QueuedMessage {
    fn from(row: MessageRow) -> Self {
        QueuedMessage {
            id: row.id,
            tenant_id: row.tenant_id,
            device: row.device,
            destination: row.destination,
            kind: MessageKind::from_db(&row.kind),
            body: row.body,
            attachment_url: row.attachment_url,
            filename: row.filename,
            server_id: row.server_id,
            priority: row.priority,
            not_before: row.not_before,
            status: MessageStatus::from_db(&row.status).unwrap_or(MessageStatus::Failed),
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        }
    }
}

const SELECT_COLUMNS: &str = "id, tenant_id, device, destination, kind, body, attachment_url, \
     filename, server_id, priority, not_before, status, attempts, last_error, \
     created_at, updated_at, processed_at";

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, message: NewMessage) -> Result<Uuid, QueueStoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO message_queue
                (id, tenant_id, device, destination, kind, body, attachment_url,
                 filename, priority, not_before, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING', 0, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&message.tenant_id)
        .bind(&message.device)
        .bind(&message.destination)
        .bind(message.kind.as_str())
        .bind(&message.body)
        .bind(&message.attachment_url)
        .bind(&message.filename)
        .bind(message.priority)
        .bind(message.not_before)
        .execute(&self.pool)
        .await?;

        QUEUE_ENQUEUED_TOTAL.inc();

        tracing::trace!(
            message_id = %id,
            tenant_id = %message.tenant_id,
            device = %message.device,
            "Message enqueued"
        );

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<QueuedMessage, QueueStoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM message_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QueuedMessage::from)
            .ok_or(QueueStoreError::NotFound(id))
    }

    async fn list(
        &self,
        status: Option<MessageStatus>,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError> {
        let rows: Vec<MessageRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM message_queue \
                     WHERE status = $1 ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM message_queue \
                     ORDER BY created_at DESC LIMIT $1"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(QueuedMessage::from).collect())
    }

    async fn claim_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError> {
        // SKIP LOCKED makes the select-and-flip a single atomic claim:
        // a row picked by one replica is invisible to concurrent claims.
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            UPDATE message_queue m
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE m.id IN (
                SELECT id FROM message_queue
                WHERE status = 'PENDING'
                  AND (not_before IS NULL OR not_before <= NOW())
                  AND attempts < $2
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .bind(max_attempts as i32)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<QueuedMessage> =
            rows.into_iter().map(QueuedMessage::from).collect();
        // RETURNING does not preserve the claim order
        messages.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        Ok(messages)
    }

    async fn set_server(&self, id: Uuid, server_id: Uuid) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            "UPDATE message_queue SET server_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(server_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE message_queue
            SET status = 'SENT', last_error = NULL, processed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<u32, QueueStoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE message_queue
            SET status = 'FAILED', attempts = attempts + 1, last_error = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        attempts
            .map(|a| a.max(0) as u32)
            .ok_or(QueueStoreError::NotFound(id))
    }

    async fn mark_failed_terminal(
        &self,
        id: Uuid,
        reason: &str,
        max_attempts: u32,
    ) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE message_queue
            SET status = 'FAILED',
                attempts = GREATEST(attempts + 1, $3),
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(max_attempts as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE message_queue
            SET status = 'PENDING', attempts = 0, last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueStoreError> {
        let result = sqlx::query("DELETE FROM message_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn purge(&self, statuses: &[MessageStatus]) -> Result<usize, QueueStoreError> {
        if statuses.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query("DELETE FROM message_queue WHERE status = ANY($1)")
            .bind(&names)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            tracing::debug!(removed = removed, statuses = ?names, "Purged messages");
        }
        Ok(removed)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueStoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM message_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match MessageStatus::from_db(&status) {
                Some(MessageStatus::Pending) => counts.pending = count as usize,
                Some(MessageStatus::Processing) => counts.processing = count as usize,
                Some(MessageStatus::Sent) => counts.sent = count as usize,
                Some(MessageStatus::Failed) => counts.failed = count as usize,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn append_sent_log(&self, entry: SentLogEntry) -> Result<(), QueueStoreError> {
        sqlx::query(
            r#"
            INSERT INTO sent_log (message_id, tenant_id, device, destination, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.message_id)
        .bind(&entry.tenant_id)
        .bind(&entry.device)
        .bind(&entry.destination)
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sent_log(&self, limit: usize) -> Result<Vec<SentLogEntry>, QueueStoreError> {
        let rows: Vec<(Uuid, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT message_id, tenant_id, device, destination, sent_at
            FROM sent_log
            ORDER BY sent_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(message_id, tenant_id, device, destination, sent_at)| SentLogEntry {
                message_id,
                tenant_id,
                device,
                destination,
                sent_at,
            })
            .collect())
    }

    async fn recover_stale_processing(&self) -> Result<usize, QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE message_queue
            SET status = 'PENDING', updated_at = NOW()
            WHERE status = 'PROCESSING'
            "#,
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected() as usize;
        if recovered > 0 {
            tracing::warn!(
                recovered = recovered,
                "Requeued stale PROCESSING messages from previous run"
            );
        }
        Ok(recovered)
    }
}
