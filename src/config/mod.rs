mod settings;

pub use settings::{
    BulkConfig, DatabaseConfig, DeliveryConfig, HealthMonitorConfig, OtelConfig, ProcessorSettings,
    ServerConfig, Settings,
};
