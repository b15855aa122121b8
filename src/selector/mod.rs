//! Backend selection.
//!
//! Two entry points: resolving the server that owns a device's session
//! (used on every dispatch), and picking the best server for a new
//! placement (used when provisioning devices).

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::registry::{BackendRegistry, BackendServer, ServerStatus};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("device {0} is not bound to any backend server")]
    DeviceNotBound(String),

    #[error("server {server_id} for device {device} is unavailable (status {status})")]
    ServerUnavailable {
        device: String,
        server_id: Uuid,
        status: &'static str,
    },
}

/// Criteria for a new placement.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementCriteria {
    /// Minimum spare user capacity the server must have
    #[serde(default = "default_min_spare")]
    pub min_spare_capacity: i64,
}

fn default_min_spare() -> i64 {
    1
}

impl Default for PlacementCriteria {
    fn default() -> Self {
        Self {
            min_spare_capacity: default_min_spare(),
        }
    }
}

pub struct BackendSelector {
    registry: Arc<BackendRegistry>,
}

impl BackendSelector {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the server currently hosting a device's session.
    ///
    /// Routing failure when the device is unbound or the bound server is
    /// not accepting new routing decisions. The binding itself is never
    /// touched here.
    pub fn resolve_for_device(&self, device: &str) -> Result<BackendServer, SelectorError> {
        let binding = self
            .registry
            .binding(device)
            .ok_or_else(|| SelectorError::DeviceNotBound(device.to_string()))?;

        let server = self.registry.get(binding.server_id).ok_or_else(|| {
            SelectorError::ServerUnavailable {
                device: device.to_string(),
                server_id: binding.server_id,
                status: "UNKNOWN",
            }
        })?;

        if !server.is_selectable() {
            return Err(SelectorError::ServerUnavailable {
                device: device.to_string(),
                server_id: server.id,
                status: if server.enabled {
                    server.status.as_str()
                } else {
                    ServerStatus::Disabled.as_str()
                },
            });
        }

        Ok(server)
    }

    /// Pick the best server for a new placement, or `None` when no
    /// candidate qualifies. `None` is a hard placement failure; callers
    /// must not fall back to a disabled or unhealthy server.
    pub fn pick_best_available(&self, criteria: &PlacementCriteria) -> Option<BackendServer> {
        let mut candidates: Vec<BackendServer> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.is_selectable() && s.spare_capacity() >= criteria.min_spare_capacity)
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.weight.cmp(&a.weight))
                .then(
                    a.load_ratio()
                        .partial_cmp(&b.load_ratio())
                        .unwrap_or(Ordering::Equal),
                )
        });

        candidates.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistryStore, ServerConfig, ServerStatsSnapshot};

    async fn registry_with_server(
        name: &str,
        priority: i32,
        weight: i32,
        total_users: u32,
    ) -> (Arc<BackendRegistry>, Uuid) {
        let registry = Arc::new(BackendRegistry::new(Arc::new(MemoryRegistryStore::new())));
        let server = registry
            .add_server(ServerConfig {
                name: name.to_string(),
                address: format!("https://{name}.example.net"),
                max_instances: 2,
                max_users_per_instance: 50,
                priority,
                weight,
                enabled: true,
                probe_interval_seconds: None,
            })
            .await
            .unwrap();
        registry
            .apply_probe_success(
                server.id,
                ServerStatsSnapshot {
                    total_users,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (registry, server.id)
    }

    async fn add_active(registry: &BackendRegistry, name: &str, priority: i32, weight: i32, total_users: u32) -> Uuid {
        let server = registry
            .add_server(ServerConfig {
                name: name.to_string(),
                address: format!("https://{name}.example.net"),
                max_instances: 2,
                max_users_per_instance: 50,
                priority,
                weight,
                enabled: true,
                probe_interval_seconds: None,
            })
            .await
            .unwrap();
        registry
            .apply_probe_success(
                server.id,
                ServerStatsSnapshot {
                    total_users,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        server.id
    }

    #[tokio::test]
    async fn test_resolve_for_bound_device() {
        let (registry, server_id) = registry_with_server("gw-1", 0, 0, 0).await;
        registry.bind_device("dev-1", server_id).await.unwrap();

        let selector = BackendSelector::new(registry);
        let server = selector.resolve_for_device("dev-1").unwrap();
        assert_eq!(server.id, server_id);
    }

    #[tokio::test]
    async fn test_resolve_unbound_device_fails() {
        let (registry, _) = registry_with_server("gw-1", 0, 0, 0).await;
        let selector = BackendSelector::new(registry);
        assert!(matches!(
            selector.resolve_for_device("ghost"),
            Err(SelectorError::DeviceNotBound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_errored_server_fails() {
        let (registry, server_id) = registry_with_server("gw-1", 0, 0, 0).await;
        registry.bind_device("dev-1", server_id).await.unwrap();
        registry.apply_probe_failure(server_id).await.unwrap();

        let selector = BackendSelector::new(registry);
        assert!(matches!(
            selector.resolve_for_device("dev-1"),
            Err(SelectorError::ServerUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_pick_prefers_priority_then_weight_then_load() {
        let (registry, _) = registry_with_server("gw-low", 1, 0, 0).await;
        let high = add_active(&registry, "gw-high", 5, 0, 90).await;
        let selector = BackendSelector::new(registry.clone());

        // Priority dominates load
        let picked = selector.pick_best_available(&PlacementCriteria::default()).unwrap();
        assert_eq!(picked.id, high);

        // Equal priority: weight breaks the tie
        let heavy = add_active(&registry, "gw-heavy", 5, 9, 90).await;
        let picked = selector.pick_best_available(&PlacementCriteria::default()).unwrap();
        assert_eq!(picked.id, heavy);

        // Equal priority and weight: lower load ratio wins
        let idle = add_active(&registry, "gw-idle", 5, 9, 0).await;
        let picked = selector.pick_best_available(&PlacementCriteria::default()).unwrap();
        assert_eq!(picked.id, idle);
    }

    #[tokio::test]
    async fn test_pick_excludes_unhealthy_and_disabled() {
        let (registry, server_id) = registry_with_server("gw-1", 0, 0, 0).await;
        let selector = BackendSelector::new(registry.clone());

        registry.apply_probe_failure(server_id).await.unwrap();
        assert!(selector.pick_best_available(&PlacementCriteria::default()).is_none());

        // Healthy again but disabled: still excluded
        registry
            .apply_probe_success(server_id, ServerStatsSnapshot::default())
            .await
            .unwrap();
        let server = registry.get(server_id).unwrap();
        registry
            .update_server(
                server_id,
                ServerConfig {
                    name: server.name,
                    address: server.address,
                    max_instances: server.max_instances,
                    max_users_per_instance: server.max_users_per_instance,
                    priority: server.priority,
                    weight: server.weight,
                    enabled: false,
                    probe_interval_seconds: None,
                },
            )
            .await
            .unwrap();
        assert!(selector.pick_best_available(&PlacementCriteria::default()).is_none());
    }

    #[tokio::test]
    async fn test_pick_respects_spare_capacity() {
        let (registry, _) = registry_with_server("gw-full", 0, 0, 100).await;
        let selector = BackendSelector::new(registry);
        // Capacity 100, load 100: no spare room
        assert!(selector.pick_best_available(&PlacementCriteria::default()).is_none());
    }
}
