//! Backend server and device binding models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operational status of a backend gateway server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerStatus {
    Active,
    Degraded,
    Error,
    Disabled,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Degraded => "DEGRADED",
            Self::Error => "ERROR",
            Self::Disabled => "DISABLED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "DEGRADED" => Some(Self::Degraded),
            "ERROR" => Some(Self::Error),
            "DISABLED" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Stats snapshot reported by a server's health endpoint.
///
/// Replaced wholesale on every successful probe, never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStatsSnapshot {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub storage_percent: f64,
    #[serde(default)]
    pub active_instances: u32,
    #[serde(default)]
    pub total_users: u32,
    #[serde(default)]
    pub messages_per_min: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub latency_p50_ms: f64,
    #[serde(default)]
    pub latency_p95_ms: f64,
    #[serde(default)]
    pub latency_p99_ms: f64,
    #[serde(default)]
    pub uptime_seconds: u64,
}

/// A registered backend gateway server.
#[derive(Debug, Clone, Serialize)]
pub struct BackendServer {
    pub id: Uuid,
    pub name: String,
    /// Base URL, e.g. `https://gw-1.example.net:3001`
    pub address: String,
    pub max_instances: i32,
    pub max_users_per_instance: i32,
    /// Higher priority wins placement ties
    pub priority: i32,
    /// Tie-break after priority
    pub weight: i32,
    pub enabled: bool,
    pub status: ServerStatus,
    /// Per-server probe cadence; falls back to the global sweep when unset
    pub probe_interval_seconds: Option<u64>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_connection: Option<DateTime<Utc>>,
    pub stats: Option<ServerStatsSnapshot>,
}

impl BackendServer {
    /// Total user sessions this server can host.
    pub fn capacity(&self) -> i64 {
        self.max_instances as i64 * self.max_users_per_instance as i64
    }

    /// Current hosted users per the latest snapshot; zero when unprobed.
    pub fn current_load(&self) -> i64 {
        self.stats.as_ref().map(|s| s.total_users as i64).unwrap_or(0)
    }

    pub fn spare_capacity(&self) -> i64 {
        self.capacity() - self.current_load()
    }

    /// Load ratio in `[0, 1]`; a server with no capacity counts as full.
    pub fn load_ratio(&self) -> f64 {
        let capacity = self.capacity();
        if capacity <= 0 {
            return 1.0;
        }
        self.current_load() as f64 / capacity as f64
    }

    /// Whether this server may receive new routing decisions.
    pub fn is_selectable(&self) -> bool {
        self.enabled && self.status == ServerStatus::Active
    }
}

/// Fields supplied when registering or updating a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_max_instances")]
    pub max_instances: i32,
    #[serde(default = "default_max_users")]
    pub max_users_per_instance: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub probe_interval_seconds: Option<u64>,
}

fn default_max_instances() -> i32 {
    10
}

fn default_max_users() -> i32 {
    50
}

fn default_enabled() -> bool {
    true
}

/// Routing fact: a device's session lives on a specific server.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceBinding {
    pub device: String,
    pub server_id: Uuid,
    pub bound_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(max_instances: i32, max_users: i32, total_users: u32) -> BackendServer {
        BackendServer {
            id: Uuid::new_v4(),
            name: "gw-1".to_string(),
            address: "https://gw-1.example.net".to_string(),
            max_instances,
            max_users_per_instance: max_users,
            priority: 0,
            weight: 0,
            enabled: true,
            status: ServerStatus::Active,
            probe_interval_seconds: None,
            last_health_check: None,
            last_connection: None,
            stats: Some(ServerStatsSnapshot {
                total_users,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_capacity_math() {
        let s = server(10, 50, 100);
        assert_eq!(s.capacity(), 500);
        assert_eq!(s.spare_capacity(), 400);
        assert!((s.load_ratio() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_capacity_counts_as_full() {
        let s = server(0, 50, 0);
        assert_eq!(s.load_ratio(), 1.0);
    }

    #[test]
    fn test_selectable_requires_active_and_enabled() {
        let mut s = server(1, 1, 0);
        assert!(s.is_selectable());
        s.status = ServerStatus::Error;
        assert!(!s.is_selectable());
        s.status = ServerStatus::Active;
        s.enabled = false;
        assert!(!s.is_selectable());
    }
}
