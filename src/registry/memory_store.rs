//! In-memory registry store for tests and single-node development.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{BackendServer, DeviceBinding};
use super::store::{ProbeUpdate, RegistryStore, RegistryStoreError};

#[derive(Default)]
pub struct MemoryRegistryStore {
    servers: DashMap<Uuid, BackendServer>,
    bindings: DashMap<String, DeviceBinding>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn upsert_server(&self, server: BackendServer) -> Result<(), RegistryStoreError> {
        self.servers.insert(server.id, server);
        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> Result<BackendServer, RegistryStoreError> {
        self.servers
            .get(&id)
            .map(|s| s.clone())
            .ok_or(RegistryStoreError::ServerNotFound(id))
    }

    async fn list_servers(&self) -> Result<Vec<BackendServer>, RegistryStoreError> {
        Ok(self.servers.iter().map(|e| e.value().clone()).collect())
    }

    async fn remove_server(&self, id: Uuid) -> Result<(), RegistryStoreError> {
        self.servers
            .remove(&id)
            .map(|_| ())
            .ok_or(RegistryStoreError::ServerNotFound(id))
    }

    async fn apply_probe(&self, id: Uuid, update: ProbeUpdate) -> Result<(), RegistryStoreError> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or(RegistryStoreError::ServerNotFound(id))?;

        server.status = update.status;
        server.last_health_check = Some(update.last_health_check);
        if let Some(connected) = update.last_connection {
            server.last_connection = Some(connected);
        }
        if let Some(stats) = update.stats {
            server.stats = Some(stats);
        }
        Ok(())
    }

    async fn bind_device(&self, binding: DeviceBinding) -> Result<(), RegistryStoreError> {
        self.bindings.insert(binding.device.clone(), binding);
        Ok(())
    }

    async fn unbind_device(&self, device: &str) -> Result<(), RegistryStoreError> {
        self.bindings
            .remove(device)
            .map(|_| ())
            .ok_or_else(|| RegistryStoreError::DeviceNotBound(device.to_string()))
    }

    async fn list_bindings(&self) -> Result<Vec<DeviceBinding>, RegistryStoreError> {
        Ok(self.bindings.iter().map(|e| e.value().clone()).collect())
    }
}
