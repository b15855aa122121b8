//! Store trait for the durable message queue.
//!
//! Defines the abstraction layer over queue persistence so the Postgres
//! store and the in-memory store (tests, single-node development) are
//! interchangeable.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::{MessageStatus, NewMessage, QueueCounts, QueuedMessage, SentLogEntry};

/// Errors that can occur during queue store operations.
#[derive(Debug, Error)]
pub enum QueueStoreError {
    /// No message with this id
    #[error("message not found: {0}")]
    NotFound(Uuid),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// Store for queued messages and the sent log.
///
/// # Claim atomicity
///
/// `claim_batch` is the load-bearing operation: under concurrent processor
/// replicas no message may be returned to more than one caller. The claim
/// (select eligible rows, flip them to PROCESSING) must be a single atomic
/// step against the store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new PENDING message, returning its id.
    async fn enqueue(&self, message: NewMessage) -> Result<Uuid, QueueStoreError>;

    /// Fetch a single message.
    async fn get(&self, id: Uuid) -> Result<QueuedMessage, QueueStoreError>;

    /// List messages, newest first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<MessageStatus>,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError>;

    /// Atomically claim up to `limit` eligible messages.
    ///
    /// Eligible: status PENDING, `not_before` elapsed (or unset), attempts
    /// below `max_attempts`. Ordered by priority descending, then creation
    /// time ascending. Claimed rows transition to PROCESSING before they
    /// are returned.
    async fn claim_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError>;

    /// Record the resolved backend server on a claimed message.
    async fn set_server(&self, id: Uuid, server_id: Uuid) -> Result<(), QueueStoreError>;

    /// Terminal success: status SENT, processed timestamp set.
    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueStoreError>;

    /// Failure for this attempt: increments the attempt counter, stores the
    /// reason, status FAILED. Returns the new attempt count.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<u32, QueueStoreError>;

    /// Non-retryable business failure: status FAILED with attempts forced to
    /// the retry bound so the message is immediately terminal.
    async fn mark_failed_terminal(
        &self,
        id: Uuid,
        reason: &str,
        max_attempts: u32,
    ) -> Result<(), QueueStoreError>;

    /// Manual retry: reset to PENDING, clear the error, reset attempts.
    async fn requeue(&self, id: Uuid) -> Result<(), QueueStoreError>;

    /// Delete a single message.
    async fn delete(&self, id: Uuid) -> Result<(), QueueStoreError>;

    /// Delete all messages in the given statuses. Returns rows removed.
    async fn purge(&self, statuses: &[MessageStatus]) -> Result<usize, QueueStoreError>;

    /// Current counts by status, read fresh from the store.
    async fn counts(&self) -> Result<QueueCounts, QueueStoreError>;

    /// Append to the immutable sent log.
    async fn append_sent_log(&self, entry: SentLogEntry) -> Result<(), QueueStoreError>;

    /// Read the most recent sent-log entries.
    async fn sent_log(&self, limit: usize) -> Result<Vec<SentLogEntry>, QueueStoreError>;

    /// Flip stale PROCESSING rows back to PENDING. Run once at startup so a
    /// crashed processor never strands messages mid-flight.
    async fn recover_stale_processing(&self) -> Result<usize, QueueStoreError>;
}
