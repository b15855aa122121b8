//! Backend server registry.
//!
//! The relational store is the source of truth; the in-process registry is
//! a read-through cache refreshed on mutation and by the health monitor.
//! Selector reads come from the cache and may be slightly stale, which is
//! acceptable for routing decisions.

mod memory_store;
mod models;
mod postgres_store;
mod store;

pub use memory_store::MemoryRegistryStore;
pub use models::{BackendServer, DeviceBinding, ServerConfig, ServerStatsSnapshot, ServerStatus};
pub use postgres_store::PostgresRegistryStore;
pub use store::{ProbeUpdate, RegistryStore, RegistryStoreError};

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::metrics::BACKENDS_ACTIVE;

pub struct BackendRegistry {
    store: Arc<dyn RegistryStore>,
    servers: DashMap<Uuid, BackendServer>,
    bindings: DashMap<String, DeviceBinding>,
}

impl BackendRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            servers: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Refresh the cache from the store. Called at startup and by the
    /// health monitor between sweeps.
    pub async fn load(&self) -> Result<usize, RegistryStoreError> {
        let servers = self.store.list_servers().await?;
        let bindings = self.store.list_bindings().await?;

        self.servers.clear();
        for server in servers {
            self.servers.insert(server.id, server);
        }
        self.bindings.clear();
        for binding in bindings {
            self.bindings.insert(binding.device.clone(), binding);
        }

        self.update_active_gauge();
        Ok(self.servers.len())
    }

    /// Register a new server. Starts DEGRADED until its first successful
    /// probe, so it cannot receive routing decisions while unproven.
    pub async fn add_server(&self, config: ServerConfig) -> Result<BackendServer, RegistryStoreError> {
        let server = BackendServer {
            id: Uuid::new_v4(),
            name: config.name,
            address: config.address,
            max_instances: config.max_instances,
            max_users_per_instance: config.max_users_per_instance,
            priority: config.priority,
            weight: config.weight,
            enabled: config.enabled,
            status: ServerStatus::Degraded,
            probe_interval_seconds: config.probe_interval_seconds,
            last_health_check: None,
            last_connection: None,
            stats: None,
        };

        self.store.upsert_server(server.clone()).await?;
        self.servers.insert(server.id, server.clone());

        tracing::info!(server_id = %server.id, name = %server.name, "Backend server registered");
        Ok(server)
    }

    /// Update a server's configuration. Operational fields are preserved.
    pub async fn update_server(
        &self,
        id: Uuid,
        config: ServerConfig,
    ) -> Result<BackendServer, RegistryStoreError> {
        let mut server = self.store.get_server(id).await?;
        server.name = config.name;
        server.address = config.address;
        server.max_instances = config.max_instances;
        server.max_users_per_instance = config.max_users_per_instance;
        server.priority = config.priority;
        server.weight = config.weight;
        server.enabled = config.enabled;
        server.probe_interval_seconds = config.probe_interval_seconds;

        self.store.upsert_server(server.clone()).await?;
        self.servers.insert(id, server.clone());
        self.update_active_gauge();
        Ok(server)
    }

    pub async fn remove_server(&self, id: Uuid) -> Result<(), RegistryStoreError> {
        self.store.remove_server(id).await?;
        self.servers.remove(&id);
        self.update_active_gauge();
        Ok(())
    }

    /// Cache read; `None` when the id is unknown.
    pub fn get(&self, id: Uuid) -> Option<BackendServer> {
        self.servers.get(&id).map(|s| s.clone())
    }

    pub fn list(&self) -> Vec<BackendServer> {
        self.servers.iter().map(|e| e.value().clone()).collect()
    }

    /// Record a successful probe: status ACTIVE, snapshot replaced
    /// wholesale, both timestamps refreshed.
    pub async fn apply_probe_success(
        &self,
        id: Uuid,
        stats: ServerStatsSnapshot,
    ) -> Result<(), RegistryStoreError> {
        let now = Utc::now();
        let update = ProbeUpdate {
            status: ServerStatus::Active,
            last_health_check: now,
            last_connection: Some(now),
            stats: Some(stats),
        };
        self.store.apply_probe(id, update.clone()).await?;
        self.apply_to_cache(id, update);
        Ok(())
    }

    /// Record a failed probe: status ERROR. Existing device bindings are
    /// left untouched; only new routing decisions are affected.
    pub async fn apply_probe_failure(&self, id: Uuid) -> Result<(), RegistryStoreError> {
        let update = ProbeUpdate {
            status: ServerStatus::Error,
            last_health_check: Utc::now(),
            last_connection: None,
            stats: None,
        };
        self.store.apply_probe(id, update.clone()).await?;
        self.apply_to_cache(id, update);
        Ok(())
    }

    pub async fn bind_device(
        &self,
        device: &str,
        server_id: Uuid,
    ) -> Result<DeviceBinding, RegistryStoreError> {
        // Binding to an unknown server is a configuration error
        self.store.get_server(server_id).await?;

        let binding = DeviceBinding {
            device: device.to_string(),
            server_id,
            bound_at: Utc::now(),
        };
        self.store.bind_device(binding.clone()).await?;
        self.bindings.insert(device.to_string(), binding.clone());

        tracing::info!(device = %device, server_id = %server_id, "Device bound to server");
        Ok(binding)
    }

    pub async fn unbind_device(&self, device: &str) -> Result<(), RegistryStoreError> {
        self.store.unbind_device(device).await?;
        self.bindings.remove(device);
        Ok(())
    }

    /// Cache read of a device's binding.
    pub fn binding(&self, device: &str) -> Option<DeviceBinding> {
        self.bindings.get(device).map(|b| b.clone())
    }

    fn apply_to_cache(&self, id: Uuid, update: ProbeUpdate) {
        if let Some(mut server) = self.servers.get_mut(&id) {
            server.status = update.status;
            server.last_health_check = Some(update.last_health_check);
            if let Some(connected) = update.last_connection {
                server.last_connection = Some(connected);
            }
            if let Some(stats) = update.stats {
                server.stats = Some(stats);
            }
        }
        self.update_active_gauge();
    }

    fn update_active_gauge(&self) {
        let active = self
            .servers
            .iter()
            .filter(|e| e.value().status == ServerStatus::Active)
            .count();
        BACKENDS_ACTIVE.set(active as i64);
    }
}
