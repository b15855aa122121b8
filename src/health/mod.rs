//! Backend health monitoring.
//!
//! A global sweep probes every registered server concurrently at a fixed
//! cadence. Servers may additionally declare their own probe interval,
//! driven by a one-second scheduler tick inside the same task. Probes use
//! a short timeout, deliberately below the delivery timeout, so a hung
//! gateway is detected quickly and cannot stall anything else.

use std::collections::HashMap;
use std::time::Duration;

use std::sync::Arc;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::HealthMonitorConfig;
use crate::metrics::HEALTH_PROBES_TOTAL;
use crate::registry::{BackendRegistry, BackendServer, RegistryStoreError, ServerStatsSnapshot, ServerStatus};

/// Issues health probes and applies the outcome to the registry.
pub struct HealthProber {
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl HealthProber {
    pub fn new(config: &HealthMonitorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_seconds))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            timeout_seconds: config.probe_timeout_seconds,
        }
    }

    /// Probe a server's health endpoint. Any failure mode (timeout,
    /// connection error, non-2xx, unparsable body) is a probe failure.
    pub async fn probe(&self, server: &BackendServer) -> Result<ServerStatsSnapshot, String> {
        let url = format!("{}/health", server.address.trim_end_matches('/'));

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("probe timeout after {}s", self.timeout_seconds)
            } else {
                e.to_string()
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        response
            .json::<ServerStatsSnapshot>()
            .await
            .map_err(|e| format!("invalid health payload: {e}"))
    }

    /// Probe and write the outcome back through the registry.
    pub async fn probe_and_apply(
        &self,
        registry: &BackendRegistry,
        server: &BackendServer,
    ) -> Result<ServerStatus, RegistryStoreError> {
        match self.probe(server).await {
            Ok(stats) => {
                HEALTH_PROBES_TOTAL.with_label_values(&["success"]).inc();
                registry.apply_probe_success(server.id, stats).await?;
                tracing::debug!(server_id = %server.id, name = %server.name, "Health probe succeeded");
                Ok(ServerStatus::Active)
            }
            Err(reason) => {
                HEALTH_PROBES_TOTAL.with_label_values(&["failure"]).inc();
                registry.apply_probe_failure(server.id).await?;
                tracing::warn!(
                    server_id = %server.id,
                    name = %server.name,
                    reason = %reason,
                    "Health probe failed, server marked ERROR"
                );
                Ok(ServerStatus::Error)
            }
        }
    }
}

/// Background task driving the sweep and the per-server cadences.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<BackendRegistry>,
    prober: Arc<HealthProber>,
    shutdown: broadcast::Receiver<()>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        registry: Arc<BackendRegistry>,
        prober: Arc<HealthProber>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            prober,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_seconds));
        let mut scheduler_tick = tokio::time::interval(Duration::from_secs(1));

        // Skip immediate first ticks
        sweep_timer.tick().await;
        scheduler_tick.tick().await;

        // Next due instant per server with a dedicated cadence
        let mut due: HashMap<Uuid, Instant> = HashMap::new();

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_seconds,
            probe_timeout_secs = self.config.probe_timeout_seconds,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal");
                    break;
                }
                _ = sweep_timer.tick() => {
                    self.sweep().await;
                }
                _ = scheduler_tick.tick() => {
                    self.run_due_probes(&mut due).await;
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Probe every registered server concurrently. Backstop for servers
    /// without a dedicated cadence.
    async fn sweep(&self) {
        if let Err(e) = self.registry.load().await {
            tracing::warn!(error = %e, "Failed to refresh registry before sweep");
        }

        let servers = self.registry.list();
        if servers.is_empty() {
            return;
        }

        let futures: Vec<_> = servers
            .iter()
            .map(|server| {
                let prober = self.prober.clone();
                let registry = self.registry.clone();
                async move {
                    if let Err(e) = prober.probe_and_apply(&registry, server).await {
                        tracing::warn!(server_id = %server.id, error = %e, "Failed to record probe outcome");
                    }
                }
            })
            .collect();

        join_all(futures).await;

        tracing::debug!(servers = servers.len(), "Health sweep completed");
    }

    /// Fire probes for servers whose dedicated interval has elapsed.
    async fn run_due_probes(&self, due: &mut HashMap<Uuid, Instant>) {
        let now = Instant::now();

        for server in self.registry.list() {
            let Some(interval) = server.probe_interval_seconds.filter(|i| *i > 0) else {
                due.remove(&server.id);
                continue;
            };

            let deadline = due.entry(server.id).or_insert_with(|| {
                // First probe jittered within the interval to spread load
                let jitter_ms = rand::rng().random_range(0..interval * 1000);
                now + Duration::from_millis(jitter_ms)
            });

            if *deadline <= now {
                if let Err(e) = self.prober.probe_and_apply(&self.registry, &server).await {
                    tracing::warn!(server_id = %server.id, error = %e, "Failed to record probe outcome");
                }
                *deadline = now + Duration::from_secs(interval);
            }
        }

        // Forget servers that were removed
        due.retain(|id, _| self.registry.get(*id).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistryStore, ServerConfig};

    async fn registry_with_address(address: &str) -> (Arc<BackendRegistry>, Uuid) {
        let registry = Arc::new(BackendRegistry::new(Arc::new(MemoryRegistryStore::new())));
        let server = registry
            .add_server(ServerConfig {
                name: "gw-1".to_string(),
                address: address.to_string(),
                max_instances: 2,
                max_users_per_instance: 10,
                priority: 0,
                weight: 0,
                enabled: true,
                probe_interval_seconds: None,
            })
            .await
            .unwrap();
        (registry, server.id)
    }

    fn prober() -> HealthProber {
        HealthProber::new(&HealthMonitorConfig {
            sweep_interval_seconds: 60,
            probe_timeout_seconds: 2,
        })
    }

    #[tokio::test]
    async fn test_successful_probe_activates_server() {
        let mut mock_server = mockito::Server::new_async().await;
        let mock = mock_server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"cpu_percent": 40.0, "total_users": 12, "messages_per_min": 8.5}"#)
            .create_async()
            .await;

        let (registry, server_id) = registry_with_address(&mock_server.url()).await;
        let server = registry.get(server_id).unwrap();

        let status = prober().probe_and_apply(&registry, &server).await.unwrap();
        assert_eq!(status, ServerStatus::Active);

        let refreshed = registry.get(server_id).unwrap();
        assert_eq!(refreshed.stats.as_ref().unwrap().total_users, 12);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failing_probe_marks_error() {
        let mut mock_server = mockito::Server::new_async().await;
        mock_server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let (registry, server_id) = registry_with_address(&mock_server.url()).await;
        let server = registry.get(server_id).unwrap();

        let status = prober().probe_and_apply(&registry, &server).await.unwrap();
        assert_eq!(status, ServerStatus::Error);
        assert_eq!(registry.get(server_id).unwrap().status, ServerStatus::Error);
    }

    #[tokio::test]
    async fn test_unreachable_server_marks_error() {
        // Nothing listens on this port
        let (registry, server_id) = registry_with_address("http://127.0.0.1:1").await;
        let server = registry.get(server_id).unwrap();

        let status = prober().probe_and_apply(&registry, &server).await.unwrap();
        assert_eq!(status, ServerStatus::Error);
    }

    #[tokio::test]
    async fn test_monitor_shutdown() {
        let registry = Arc::new(BackendRegistry::new(Arc::new(MemoryRegistryStore::new())));
        let config = HealthMonitorConfig {
            sweep_interval_seconds: 60,
            probe_timeout_seconds: 2,
        };
        let prober = Arc::new(HealthProber::new(&config));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let monitor = HealthMonitor::new(config, registry, prober, shutdown_rx);
        let handle = tokio::spawn(async move { monitor.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }
}
