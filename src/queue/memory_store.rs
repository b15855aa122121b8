//! In-memory queue store for tests and single-node development.
//!
//! A single mutex guards the message map, which makes the batch claim
//! trivially atomic: concurrent claimers serialize on the lock, so no
//! message is ever handed to two callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::metrics::QUEUE_ENQUEUED_TOTAL;

use super::models::{MessageStatus, NewMessage, QueueCounts, QueuedMessage, SentLogEntry};
use super::store::{QueueStore, QueueStoreError};

#[derive(Default)]
pub struct MemoryQueueStore {
    messages: Mutex<HashMap<Uuid, QueuedMessage>>,
    sent_log: Mutex<Vec<SentLogEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, message: NewMessage) -> Result<Uuid, QueueStoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let queued = QueuedMessage {
            id,
            tenant_id: message.tenant_id,
            device: message.device,
            destination: message.destination,
            kind: message.kind,
            body: message.body,
            attachment_url: message.attachment_url,
            filename: message.filename,
            server_id: None,
            priority: message.priority,
            not_before: message.not_before,
            status: MessageStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };

        self.messages.lock().await.insert(id, queued);
        QUEUE_ENQUEUED_TOTAL.inc();
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<QueuedMessage, QueueStoreError> {
        self.messages
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(QueueStoreError::NotFound(id))
    }

    async fn list(
        &self,
        status: Option<MessageStatus>,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError> {
        let messages = self.messages.lock().await;
        let mut result: Vec<QueuedMessage> = messages
            .values()
            .filter(|m| status.is_none_or(|s| m.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<QueuedMessage>, QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let now = Utc::now();

        let mut eligible: Vec<Uuid> = messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Pending
                    && m.attempts < max_attempts
                    && m.not_before.is_none_or(|nb| nb <= now)
            })
            .map(|m| m.id)
            .collect();

        eligible.sort_by(|a, b| {
            let ma = &messages[a];
            let mb = &messages[b];
            mb.priority
                .cmp(&ma.priority)
                .then(ma.created_at.cmp(&mb.created_at))
        });
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(m) = messages.get_mut(&id) {
                m.status = MessageStatus::Processing;
                m.updated_at = now;
                claimed.push(m.clone());
            }
        }
        Ok(claimed)
    }

    async fn set_server(&self, id: Uuid, server_id: Uuid) -> Result<(), QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let m = messages.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        m.server_id = Some(server_id);
        m.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let m = messages.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        let now = Utc::now();
        m.status = MessageStatus::Sent;
        m.last_error = None;
        m.processed_at = Some(now);
        m.updated_at = now;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<u32, QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let m = messages.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        m.status = MessageStatus::Failed;
        m.attempts += 1;
        m.last_error = Some(reason.to_string());
        m.updated_at = Utc::now();
        Ok(m.attempts)
    }

    async fn mark_failed_terminal(
        &self,
        id: Uuid,
        reason: &str,
        max_attempts: u32,
    ) -> Result<(), QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let m = messages.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        m.status = MessageStatus::Failed;
        m.attempts = (m.attempts + 1).max(max_attempts);
        m.last_error = Some(reason.to_string());
        m.updated_at = Utc::now();
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<(), QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let m = messages.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        m.status = MessageStatus::Pending;
        m.attempts = 0;
        m.last_error = None;
        m.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueStoreError> {
        self.messages
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueStoreError::NotFound(id))
    }

    async fn purge(&self, statuses: &[MessageStatus]) -> Result<usize, QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let before = messages.len();
        messages.retain(|_, m| !statuses.contains(&m.status));
        Ok(before - messages.len())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueStoreError> {
        let messages = self.messages.lock().await;
        let mut counts = QueueCounts::default();
        for m in messages.values() {
            match m.status {
                MessageStatus::Pending => counts.pending += 1,
                MessageStatus::Processing => counts.processing += 1,
                MessageStatus::Sent => counts.sent += 1,
                MessageStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn append_sent_log(&self, entry: SentLogEntry) -> Result<(), QueueStoreError> {
        self.sent_log.lock().await.push(entry);
        Ok(())
    }

    async fn sent_log(&self, limit: usize) -> Result<Vec<SentLogEntry>, QueueStoreError> {
        let log = self.sent_log.lock().await;
        Ok(log.iter().rev().take(limit).cloned().collect())
    }

    async fn recover_stale_processing(&self) -> Result<usize, QueueStoreError> {
        let mut messages = self.messages.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        for m in messages.values_mut() {
            if m.status == MessageStatus::Processing {
                m.status = MessageStatus::Pending;
                m.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::models::MessageKind;
    use super::*;

    fn new_message(priority: i32) -> NewMessage {
        NewMessage {
            tenant_id: "tenant-a".to_string(),
            device: "dev-1".to_string(),
            destination: "9876543210".to_string(),
            kind: MessageKind::Text,
            body: "hello".to_string(),
            attachment_url: None,
            filename: None,
            priority,
            not_before: None,
        }
    }

    #[tokio::test]
    async fn test_claim_orders_priority_then_age() {
        let store = MemoryQueueStore::new();
        let low = store.enqueue(new_message(0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let high = store.enqueue(new_message(5)).await.unwrap();

        let batch = store.claim_batch(10, 3).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, high);
        assert_eq!(batch[1].id, low);
        assert!(batch.iter().all(|m| m.status == MessageStatus::Processing));
    }

    #[tokio::test]
    async fn test_claimed_rows_not_reclaimed() {
        let store = MemoryQueueStore::new();
        store.enqueue(new_message(0)).await.unwrap();

        let first = store.claim_batch(10, 3).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_batch(10, 3).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_no_double_claim_under_concurrency() {
        let store = Arc::new(MemoryQueueStore::new());
        for _ in 0..50 {
            store.enqueue(new_message(0)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.claim_batch(10, 3).await.unwrap() },
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for m in handle.await.unwrap() {
                assert!(seen.insert(m.id), "message {} claimed twice", m.id);
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_not_before_gates_eligibility() {
        let store = MemoryQueueStore::new();
        let mut msg = new_message(0);
        msg.not_before = Some(Utc::now() + chrono::Duration::hours(1));
        store.enqueue(msg).await.unwrap();

        assert!(store.claim_batch(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rows_need_explicit_requeue() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue(new_message(0)).await.unwrap();

        store.claim_batch(10, 3).await.unwrap();
        let attempts = store
            .mark_failed(id, "transport: connection refused")
            .await
            .unwrap();
        assert_eq!(attempts, 1);

        // FAILED is not auto-eligible even with attempts below the bound
        assert!(store.claim_batch(10, 3).await.unwrap().is_empty());

        store.requeue(id).await.unwrap();
        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.attempts, 0);
        assert!(msg.last_error.is_none());

        // Eligible again after the reset
        assert_eq!(store.claim_batch(10, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_pins_attempts_to_bound() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue(new_message(0)).await.unwrap();
        store.claim_batch(10, 3).await.unwrap();

        store
            .mark_failed_terminal(id, "credit exhausted for tenant", 3)
            .await
            .unwrap();

        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.attempts, 3);
    }

    #[tokio::test]
    async fn test_recover_stale_processing() {
        let store = MemoryQueueStore::new();
        store.enqueue(new_message(0)).await.unwrap();
        store.claim_batch(10, 3).await.unwrap();

        let recovered = store.recover_stale_processing().await.unwrap();
        assert_eq!(recovered, 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 0);
    }
}
