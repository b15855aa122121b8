//! PostgreSQL connection pool construction.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Create a connection pool from configuration.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds as u64))
        .connect(&config.url)
        .await?;

    tracing::info!(
        pool_size = config.pool_size,
        "PostgreSQL connection pool created"
    );

    Ok(pool)
}
