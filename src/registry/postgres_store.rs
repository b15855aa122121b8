//! PostgreSQL-backed registry store.
//!
//! Table structure:
//! - `backend_servers` - server configs plus operational fields, stats as JSONB
//! - `device_bindings` - device name to server id routing facts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{BackendServer, DeviceBinding, ServerStatsSnapshot, ServerStatus};
use super::store::{ProbeUpdate, RegistryStore, RegistryStoreError};

pub struct PostgresRegistryStore {
    pool: PgPool,
}

impl PostgresRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: Uuid,
    name: String,
    address: String,
    max_instances: i32,
    max_users_per_instance: i32,
    priority: i32,
    weight: i32,
    enabled: bool,
    status: String,
    probe_interval_seconds: Option<i64>,
    last_health_check: Option<DateTime<Utc>>,
    last_connection: Option<DateTime<Utc>>,
    stats: Option<serde_json::Value>,
}

impl ServerRow {
    fn into_server(self) -> Result<BackendServer, RegistryStoreError> {
        let stats: Option<ServerStatsSnapshot> = match self.stats {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(BackendServer {
            id: self.id,
            name: self.name,
            address: self.address,
            max_instances: self.max_instances,
            max_users_per_instance: self.max_users_per_instance,
            priority: self.priority,
            weight: self.weight,
            enabled: self.enabled,
            status: ServerStatus::from_db(&self.status).unwrap_or(ServerStatus::Error),
            probe_interval_seconds: self.probe_interval_seconds.map(|s| s.max(0) as u64),
            last_health_check: self.last_health_check,
            last_connection: self.last_connection,
            stats,
        })
    }
}

const SERVER_COLUMNS: &str = "id, name, address, max_instances, max_users_per_instance, \
     priority, weight, enabled, status, probe_interval_seconds, \
     last_health_check, last_connection, stats";

#[async_trait]
impl RegistryStore for PostgresRegistryStore {
    async fn upsert_server(&self, server: BackendServer) -> Result<(), RegistryStoreError> {
        let stats = server
            .stats
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO backend_servers
                (id, name, address, max_instances, max_users_per_instance, priority,
                 weight, enabled, status, probe_interval_seconds,
                 last_health_check, last_connection, stats, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                address = EXCLUDED.address,
                max_instances = EXCLUDED.max_instances,
                max_users_per_instance = EXCLUDED.max_users_per_instance,
                priority = EXCLUDED.priority,
                weight = EXCLUDED.weight,
                enabled = EXCLUDED.enabled,
                probe_interval_seconds = EXCLUDED.probe_interval_seconds,
                updated_at = NOW()
            "#,
        )
        .bind(server.id)
        .bind(&server.name)
        .bind(&server.address)
        .bind(server.max_instances)
        .bind(server.max_users_per_instance)
        .bind(server.priority)
        .bind(server.weight)
        .bind(server.enabled)
        .bind(server.status.as_str())
        .bind(server.probe_interval_seconds.map(|s| s as i64))
        .bind(server.last_health_check)
        .bind(server.last_connection)
        .bind(stats)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> Result<BackendServer, RegistryStoreError> {
        let row: Option<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM backend_servers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_server(),
            None => Err(RegistryStoreError::ServerNotFound(id)),
        }
    }

    async fn list_servers(&self) -> Result<Vec<BackendServer>, RegistryStoreError> {
        let rows: Vec<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM backend_servers ORDER BY priority DESC, name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ServerRow::into_server).collect()
    }

    async fn remove_server(&self, id: Uuid) -> Result<(), RegistryStoreError> {
        let result = sqlx::query("DELETE FROM backend_servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryStoreError::ServerNotFound(id));
        }
        Ok(())
    }

    async fn apply_probe(&self, id: Uuid, update: ProbeUpdate) -> Result<(), RegistryStoreError> {
        let stats = update.stats.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE backend_servers
            SET status = $2,
                last_health_check = $3,
                last_connection = COALESCE($4, last_connection),
                stats = COALESCE($5, stats),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.last_health_check)
        .bind(update.last_connection)
        .bind(stats)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryStoreError::ServerNotFound(id));
        }
        Ok(())
    }

    async fn bind_device(&self, binding: DeviceBinding) -> Result<(), RegistryStoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_bindings (device, server_id, bound_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (device) DO UPDATE SET
                server_id = EXCLUDED.server_id,
                bound_at = EXCLUDED.bound_at
            "#,
        )
        .bind(&binding.device)
        .bind(binding.server_id)
        .bind(binding.bound_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unbind_device(&self, device: &str) -> Result<(), RegistryStoreError> {
        let result = sqlx::query("DELETE FROM device_bindings WHERE device = $1")
            .bind(device)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryStoreError::DeviceNotBound(device.to_string()));
        }
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<DeviceBinding>, RegistryStoreError> {
        let rows: Vec<(String, Uuid, DateTime<Utc>)> =
            sqlx::query_as("SELECT device, server_id, bound_at FROM device_bindings")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(device, server_id, bound_at)| DeviceBinding {
                device,
                server_id,
                bound_at,
            })
            .collect())
    }
}
