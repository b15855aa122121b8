use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub health: HealthMonitorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

/// Queue processor settings. Mutable at runtime through the admin API;
/// these values are the boot-time defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Whether the processor starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between processing cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_seconds: u64,
    /// Maximum messages claimed per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum delivery attempts before a message is terminally failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between consecutive sends within a batch, in milliseconds
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthMonitorConfig {
    /// Seconds between global sweeps over all registered servers
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Probe timeout, deliberately shorter than the delivery timeout
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Timeout for send calls to a backend gateway
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    /// Country code prefixed onto bare 10-digit mobile numbers
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// Routing suffix appended to normalized destinations
    #[serde(default = "default_address_suffix")]
    pub address_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    /// Hard cap on items accepted in a single bulk enqueue call
    #[serde(default = "default_bulk_max")]
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_true() -> bool {
    true
}

fn default_cycle_interval() -> u64 {
    5
}

fn default_batch_size() -> usize {
    25
}

fn default_max_retries() -> u32 {
    3
}

fn default_message_delay_ms() -> u64 {
    500
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_send_timeout() -> u64 {
    30
}

fn default_country_code() -> String {
    "91".to_string()
}

fn default_address_suffix() -> String {
    "@s.whatsapp.net".to_string()
}

fn default_bulk_max() -> usize {
    500
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "nexa-delivery-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("database.url", "postgres://localhost/nexa_delivery")?
            .set_default("processor.cycle_interval_seconds", 5)?
            .set_default("processor.batch_size", 25)?
            .set_default("processor.max_retries", 3)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, DATABASE_URL, PROCESSOR_BATCH_SIZE, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_interval_seconds: default_cycle_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            message_delay_ms: default_message_delay_ms(),
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            probe_timeout_seconds: default_probe_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_seconds: default_send_timeout(),
            default_country_code: default_country_code(),
            address_suffix: default_address_suffix(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_bulk_max(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8082);

        let processor = ProcessorSettings::default();
        assert_eq!(processor.cycle_interval_seconds, 5);
        assert_eq!(processor.batch_size, 25);
        assert_eq!(processor.max_retries, 3);
    }

    #[test]
    fn test_probe_timeout_shorter_than_send_timeout() {
        let health = HealthMonitorConfig::default();
        let delivery = DeliveryConfig::default();
        assert!(health.probe_timeout_seconds < delivery.send_timeout_seconds);
    }
}
