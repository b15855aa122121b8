// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod telemetry;

// Domain layer (delivery pipeline)
pub mod credit;
pub mod delivery;
pub mod health;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod selector;

// Application layer
pub mod api;
pub mod server;
