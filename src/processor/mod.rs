//! Queue processor: the cycle-driven dispatch loop.
//!
//! Each cycle atomically claims a batch of eligible messages and dispatches
//! them sequentially, pacing consecutive sends with a configurable delay.
//! Sequential dispatch is deliberate: it preserves submission order per
//! destination and keeps the send rate gateway-friendly.
//!
//! Runtime knobs (interval, batch size, retry bound, pacing delay) live in
//! a shared [`ProcessorControl`] and take effect at the next cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::ProcessorSettings;
use crate::credit::CreditLedger;
use crate::delivery::{Deliverer, DeliveryError};
use crate::metrics::{
    CREDIT_DEDUCTED_TOTAL, CYCLE_DURATION_SECONDS, MESSAGES_FAILED_TOTAL, MESSAGES_SENT_TOTAL,
    QUEUE_CLAIMED_TOTAL, QUEUE_PENDING,
};
use crate::queue::{QueueStats, QueueStore, QueueStoreError, QueuedMessage, SentLogEntry};
use crate::selector::{BackendSelector, SelectorError};

/// Partial update for the runtime settings. Absent fields keep their
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorSettingsUpdate {
    pub cycle_interval_seconds: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub message_delay_ms: Option<u64>,
}

/// Shared runtime state of the processor: the pause flag and the mutable
/// settings. Handlers hold this alongside the running task.
pub struct ProcessorControl {
    paused: AtomicBool,
    settings: RwLock<ProcessorSettings>,
}

impl ProcessorControl {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self {
            paused: AtomicBool::new(!settings.enabled),
            settings: RwLock::new(settings),
        }
    }

    /// Stop claiming new batches. Messages already claimed in the current
    /// cycle still run to completion.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("Queue processor paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("Queue processor resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> ProcessorSettings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    /// Apply a partial settings update. Takes effect at the next cycle.
    pub fn update_settings(&self, update: ProcessorSettingsUpdate) -> ProcessorSettings {
        let mut settings = self.settings.write().expect("settings lock poisoned");
        if let Some(v) = update.cycle_interval_seconds {
            settings.cycle_interval_seconds = v.max(1);
        }
        if let Some(v) = update.batch_size {
            settings.batch_size = v.max(1);
        }
        if let Some(v) = update.max_retries {
            settings.max_retries = v.max(1);
        }
        if let Some(v) = update.message_delay_ms {
            settings.message_delay_ms = v;
        }
        tracing::info!(
            cycle_interval_secs = settings.cycle_interval_seconds,
            batch_size = settings.batch_size,
            max_retries = settings.max_retries,
            message_delay_ms = settings.message_delay_ms,
            "Processor settings updated"
        );
        settings.clone()
    }
}

/// Outcome of a single processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    ledger: Arc<dyn CreditLedger>,
    selector: Arc<BackendSelector>,
    deliverer: Arc<dyn Deliverer>,
    control: Arc<ProcessorControl>,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn CreditLedger>,
        selector: Arc<BackendSelector>,
        deliverer: Arc<dyn Deliverer>,
        control: Arc<ProcessorControl>,
    ) -> Self {
        Self {
            store,
            ledger,
            selector,
            deliverer,
            control,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Queue processor started");

        loop {
            let interval = self.control.settings().cycle_interval_seconds.max(1);

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Queue processor received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                    if self.control.is_paused() {
                        continue;
                    }
                    match self.run_cycle().await {
                        Ok(outcome) if outcome.claimed > 0 => {
                            tracing::info!(
                                claimed = outcome.claimed,
                                sent = outcome.sent,
                                failed = outcome.failed,
                                "Processing cycle completed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Processing cycle failed");
                        }
                    }
                }
            }
        }

        tracing::info!("Queue processor stopped");
    }

    /// Claim and dispatch one batch. Failures of individual messages are
    /// recorded on their rows and never abort the rest of the batch.
    #[tracing::instrument(name = "processor.cycle", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, QueueStoreError> {
        let settings = self.control.settings();
        let timer = CYCLE_DURATION_SECONDS.start_timer();

        let batch = self
            .store
            .claim_batch(settings.batch_size, settings.max_retries)
            .await?;

        let mut outcome = CycleOutcome {
            claimed: batch.len(),
            ..Default::default()
        };
        QUEUE_CLAIMED_TOTAL.inc_by(batch.len() as u64);

        for (index, message) in batch.iter().enumerate() {
            if index > 0 && settings.message_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(settings.message_delay_ms)).await;
            }

            if self.dispatch_one(message, &settings).await {
                outcome.sent += 1;
            } else {
                outcome.failed += 1;
            }
        }

        timer.observe_duration();

        match self.store.counts().await {
            Ok(counts) => QUEUE_PENDING.set(counts.pending as i64),
            Err(e) => tracing::warn!(error = %e, "Failed to read queue counts"),
        }

        Ok(outcome)
    }

    /// Dispatch a single claimed message. Returns whether it was sent.
    /// Store write failures are logged, never propagated.
    async fn dispatch_one(&self, message: &QueuedMessage, settings: &ProcessorSettings) -> bool {
        // Routing: the device must be bound to a selectable server. An
        // unbound device is a configuration error and terminal; a bound
        // server that is merely unhealthy may recover, so that attempt
        // counts like any other failure.
        let server = match self.selector.resolve_for_device(&message.device) {
            Ok(server) => server,
            Err(e @ SelectorError::DeviceNotBound(_)) => {
                MESSAGES_FAILED_TOTAL.with_label_values(&["routing"]).inc();
                self.record_terminal_failure(message, &format!("routing: {e}"), settings)
                    .await;
                return false;
            }
            Err(e @ SelectorError::ServerUnavailable { .. }) => {
                MESSAGES_FAILED_TOTAL.with_label_values(&["routing"]).inc();
                self.record_failure(message, &format!("routing: {e}")).await;
                return false;
            }
        };

        if let Err(e) = self.store.set_server(message.id, server.id).await {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to record resolved server");
        }

        // Credit gate before the network call
        match self.ledger.check_available(&message.tenant_id, 1).await {
            Ok(true) => {}
            Ok(false) => {
                MESSAGES_FAILED_TOTAL.with_label_values(&["credit"]).inc();
                self.record_terminal_failure(
                    message,
                    &format!("credit exhausted for tenant {}", message.tenant_id),
                    settings,
                )
                .await;
                return false;
            }
            Err(e) => {
                // Ledger unavailable is retryable, not a credit verdict
                MESSAGES_FAILED_TOTAL.with_label_values(&["ledger"]).inc();
                self.record_failure(message, &format!("credit check failed: {e}"))
                    .await;
                return false;
            }
        }

        match self.deliverer.send(&server, message).await {
            Ok(_) => {
                self.record_success(message).await;
                true
            }
            Err(e) => {
                let reason = match &e {
                    DeliveryError::Transport(_) => "transport",
                    DeliveryError::Application(_) => "backend",
                };
                MESSAGES_FAILED_TOTAL.with_label_values(&[reason]).inc();
                self.record_failure(message, &e.to_string()).await;
                false
            }
        }
    }

    async fn record_success(&self, message: &QueuedMessage) {
        if let Err(e) = self.store.mark_sent(message.id).await {
            tracing::error!(message_id = %message.id, error = %e, "Failed to mark message sent");
        }

        // Deduct after the confirmed send so a delivery failure never burns
        // credit. The race with a concurrent drain is accepted: the message
        // is already out.
        match self.ledger.deduct(&message.tenant_id, 1).await {
            Ok(plan) => {
                CREDIT_DEDUCTED_TOTAL
                    .with_label_values(&["voucher"])
                    .inc_by(plan.from_voucher as u64);
                CREDIT_DEDUCTED_TOTAL
                    .with_label_values(&["subscription"])
                    .inc_by(plan.from_subscription as u64);
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    tenant_id = %message.tenant_id,
                    error = %e,
                    "Message sent but credit deduction failed"
                );
            }
        }

        let entry = SentLogEntry {
            message_id: message.id,
            tenant_id: message.tenant_id.clone(),
            device: message.device.clone(),
            destination: message.destination.clone(),
            sent_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.append_sent_log(entry).await {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to append sent log");
        }

        MESSAGES_SENT_TOTAL.inc();
        tracing::info!(
            message_id = %message.id,
            tenant_id = %message.tenant_id,
            device = %message.device,
            "Message sent"
        );
    }

    async fn record_failure(&self, message: &QueuedMessage, reason: &str) {
        match self.store.mark_failed(message.id, reason).await {
            Ok(attempts) => {
                tracing::warn!(
                    message_id = %message.id,
                    attempts,
                    reason = %reason,
                    "Message delivery failed"
                );
            }
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Failed to mark message failed");
            }
        }
    }

    async fn record_terminal_failure(
        &self,
        message: &QueuedMessage,
        reason: &str,
        settings: &ProcessorSettings,
    ) {
        if let Err(e) = self
            .store
            .mark_failed_terminal(message.id, reason, settings.max_retries)
            .await
        {
            tracing::error!(message_id = %message.id, error = %e, "Failed to mark message failed");
        }
        tracing::warn!(
            message_id = %message.id,
            reason = %reason,
            "Message failed terminally"
        );
    }
}

/// Aggregate queue statistics at the current settings.
pub async fn compute_queue_stats(
    store: &dyn QueueStore,
    settings: &ProcessorSettings,
) -> Result<QueueStats, QueueStoreError> {
    let counts = store.counts().await?;
    let interval = settings.cycle_interval_seconds.max(1);
    let batch = settings.batch_size.max(1);

    let throughput = batch as f64 / interval as f64 * 60.0;
    let drain_cycles = counts.pending.div_ceil(batch) as u64;

    Ok(QueueStats {
        counts,
        total: counts.total(),
        estimated_throughput_per_min: throughput,
        estimated_drain_seconds: drain_cycles * interval,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::credit::{CreditPool, MemoryCreditLedger};
    use crate::queue::{MemoryQueueStore, MessageStatus, NewMessage};
    use crate::registry::{BackendRegistry, BackendServer, MemoryRegistryStore, ServerConfig, ServerStatsSnapshot};

    use super::*;

    struct StubDeliverer {
        sends: AtomicUsize,
        failure: Option<String>,
    }

    impl StubDeliverer {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                sends: AtomicUsize::new(0),
                failure: None,
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                sends: AtomicUsize::new(0),
                failure: Some(reason.to_string()),
            })
        }

        fn send_count(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Deliverer for StubDeliverer {
        async fn send(
            &self,
            _backend: &BackendServer,
            _message: &QueuedMessage,
        ) -> Result<Value, DeliveryError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                Some(reason) => Err(DeliveryError::Transport(reason.clone())),
                None => Ok(json!({ "success": true })),
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryQueueStore>,
        ledger: Arc<MemoryCreditLedger>,
        registry: Arc<BackendRegistry>,
        server_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(BackendRegistry::new(Arc::new(MemoryRegistryStore::new())));
        let server = registry
            .add_server(ServerConfig {
                name: "gw-1".to_string(),
                address: "https://gw-1.example.net".to_string(),
                max_instances: 2,
                max_users_per_instance: 10,
                priority: 0,
                weight: 0,
                enabled: true,
                probe_interval_seconds: None,
            })
            .await
            .unwrap();
        registry
            .apply_probe_success(server.id, ServerStatsSnapshot::default())
            .await
            .unwrap();
        registry.bind_device("dev-1", server.id).await.unwrap();

        let ledger = Arc::new(MemoryCreditLedger::new());
        ledger
            .set_pool(CreditPool {
                tenant_id: "acme".to_string(),
                subscription_quota_total: 100,
                subscription_quota_used: 0,
                voucher_balance: 5,
            })
            .await;

        Fixture {
            store: Arc::new(MemoryQueueStore::new()),
            ledger,
            registry,
            server_id: server.id,
        }
    }

    fn processor(fixture: &Fixture, deliverer: Arc<StubDeliverer>) -> QueueProcessor {
        let settings = ProcessorSettings {
            message_delay_ms: 0,
            ..Default::default()
        };
        QueueProcessor::new(
            fixture.store.clone(),
            fixture.ledger.clone(),
            Arc::new(BackendSelector::new(fixture.registry.clone())),
            deliverer,
            Arc::new(ProcessorControl::new(settings)),
        )
    }

    fn new_message(device: &str) -> NewMessage {
        NewMessage {
            tenant_id: "acme".to_string(),
            device: device.to_string(),
            destination: "9876543210".to_string(),
            kind: Default::default(),
            body: "hello".to_string(),
            attachment_url: None,
            filename: None,
            priority: 0,
            not_before: None,
        }
    }

    #[tokio::test]
    async fn test_happy_path_send() {
        let f = fixture().await;
        let deliverer = StubDeliverer::ok();
        let processor = processor(&f, deliverer.clone());

        let id = f.store.enqueue(new_message("dev-1")).await.unwrap();
        let outcome = processor.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome { claimed: 1, sent: 1, failed: 0 });
        assert_eq!(deliverer.send_count(), 1);

        let message = f.store.get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.server_id, Some(f.server_id));
        assert!(message.processed_at.is_some());

        // Voucher consumed first
        let pool = f.ledger.pool("acme").await.unwrap();
        assert_eq!(pool.voucher_balance, 4);
        assert_eq!(pool.subscription_quota_used, 0);

        let log = f.store.sent_log(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message_id, id);
    }

    #[tokio::test]
    async fn test_backend_failure_records_attempt_without_charging() {
        let f = fixture().await;
        let processor = processor(&f, StubDeliverer::failing("connection refused"));

        let id = f.store.enqueue(new_message("dev-1")).await.unwrap();
        let outcome = processor.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome { claimed: 1, sent: 0, failed: 1 });

        let message = f.store.get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.attempts, 1);
        assert!(message.last_error.as_deref().unwrap().contains("transport"));

        // No credit burned on a failed delivery
        let pool = f.ledger.pool("acme").await.unwrap();
        assert_eq!(pool.total_available(), 105);
    }

    #[tokio::test]
    async fn test_unbound_device_fails_terminally() {
        let f = fixture().await;
        let deliverer = StubDeliverer::ok();
        let processor = processor(&f, deliverer.clone());

        let id = f.store.enqueue(new_message("ghost-device")).await.unwrap();
        processor.run_cycle().await.unwrap();

        let message = f.store.get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(message.attempts >= ProcessorSettings::default().max_retries);
        assert!(message.last_error.as_deref().unwrap().starts_with("routing:"));
        assert_eq!(deliverer.send_count(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_bound_server_counts_one_attempt() {
        let f = fixture().await;
        f.registry.apply_probe_failure(f.server_id).await.unwrap();
        let deliverer = StubDeliverer::ok();
        let processor = processor(&f, deliverer.clone());

        let id = f.store.enqueue(new_message("dev-1")).await.unwrap();
        processor.run_cycle().await.unwrap();

        // Retryable: the server may come back, so only this attempt is spent
        let message = f.store.get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.attempts, 1);
        assert!(message.last_error.as_deref().unwrap().starts_with("routing:"));
        assert_eq!(deliverer.send_count(), 0);
    }

    #[tokio::test]
    async fn test_credit_exhaustion_fails_terminally_before_send() {
        let f = fixture().await;
        f.ledger
            .set_pool(CreditPool {
                tenant_id: "acme".to_string(),
                subscription_quota_total: 10,
                subscription_quota_used: 10,
                voucher_balance: 0,
            })
            .await;
        let deliverer = StubDeliverer::ok();
        let processor = processor(&f, deliverer.clone());

        let id = f.store.enqueue(new_message("dev-1")).await.unwrap();
        processor.run_cycle().await.unwrap();

        let message = f.store.get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(message.last_error.as_deref().unwrap().contains("credit exhausted"));
        assert_eq!(deliverer.send_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let f = fixture().await;
        let deliverer = StubDeliverer::ok();
        let processor = processor(&f, deliverer.clone());

        f.store.enqueue(new_message("ghost-device")).await.unwrap();
        f.store.enqueue(new_message("dev-1")).await.unwrap();

        let outcome = processor.run_cycle().await.unwrap();
        assert_eq!(outcome.claimed, 2);
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn test_batch_size_applies_next_cycle() {
        let f = fixture().await;
        let control = Arc::new(ProcessorControl::new(ProcessorSettings {
            message_delay_ms: 0,
            ..Default::default()
        }));
        let processor = QueueProcessor::new(
            f.store.clone(),
            f.ledger.clone(),
            Arc::new(BackendSelector::new(f.registry.clone())),
            StubDeliverer::ok(),
            control.clone(),
        );

        for _ in 0..3 {
            f.store.enqueue(new_message("dev-1")).await.unwrap();
        }

        control.update_settings(ProcessorSettingsUpdate {
            batch_size: Some(2),
            ..Default::default()
        });

        let outcome = processor.run_cycle().await.unwrap();
        assert_eq!(outcome.claimed, 2);
        let outcome = processor.run_cycle().await.unwrap();
        assert_eq!(outcome.claimed, 1);
    }

    #[tokio::test]
    async fn test_pause_resume_flag() {
        let control = ProcessorControl::new(ProcessorSettings::default());
        assert!(!control.is_paused());
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn test_queue_stats_drain_estimate() {
        let f = fixture().await;
        for _ in 0..60 {
            f.store.enqueue(new_message("dev-1")).await.unwrap();
        }

        let settings = ProcessorSettings {
            cycle_interval_seconds: 5,
            batch_size: 25,
            ..Default::default()
        };
        let stats = compute_queue_stats(f.store.as_ref(), &settings).await.unwrap();

        assert_eq!(stats.counts.pending, 60);
        assert_eq!(stats.total, 60);
        // 60 pending at 25 per 5s cycle: 3 cycles
        assert_eq!(stats.estimated_drain_seconds, 15);
        assert!((stats.estimated_throughput_per_min - 300.0).abs() < f64::EPSILON);
    }
}
