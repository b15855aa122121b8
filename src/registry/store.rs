//! Persistence trait for the backend registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{BackendServer, DeviceBinding, ServerStatsSnapshot, ServerStatus};

#[derive(Debug, Error)]
pub enum RegistryStoreError {
    #[error("server not found: {0}")]
    ServerNotFound(Uuid),

    #[error("device not bound: {0}")]
    DeviceNotBound(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Operational fields written by the health monitor after a probe.
#[derive(Debug, Clone)]
pub struct ProbeUpdate {
    pub status: ServerStatus,
    pub last_health_check: DateTime<Utc>,
    /// Only set on successful probes
    pub last_connection: Option<DateTime<Utc>>,
    /// Replaced wholesale on success; untouched on failure when `None`
    pub stats: Option<ServerStatsSnapshot>,
}

/// Durable storage for server configs and device bindings.
///
/// The in-process registry caches this store; the health monitor is the
/// only writer of operational fields.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn upsert_server(&self, server: BackendServer) -> Result<(), RegistryStoreError>;
    async fn get_server(&self, id: Uuid) -> Result<BackendServer, RegistryStoreError>;
    async fn list_servers(&self) -> Result<Vec<BackendServer>, RegistryStoreError>;
    async fn remove_server(&self, id: Uuid) -> Result<(), RegistryStoreError>;

    /// Apply a probe outcome to a server's operational fields.
    async fn apply_probe(&self, id: Uuid, update: ProbeUpdate) -> Result<(), RegistryStoreError>;

    async fn bind_device(&self, binding: DeviceBinding) -> Result<(), RegistryStoreError>;
    async fn unbind_device(&self, device: &str) -> Result<(), RegistryStoreError>;
    async fn list_bindings(&self) -> Result<Vec<DeviceBinding>, RegistryStoreError>;
}
