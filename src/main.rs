use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use nexa_delivery_service::config::Settings;
use nexa_delivery_service::credit::PostgresCreditLedger;
use nexa_delivery_service::delivery::HttpDeliveryExecutor;
use nexa_delivery_service::health::HealthMonitor;
use nexa_delivery_service::infrastructure::postgres::create_pool;
use nexa_delivery_service::processor::QueueProcessor;
use nexa_delivery_service::queue::{PostgresQueueStore, QueueStore};
use nexa_delivery_service::registry::{BackendRegistry, PostgresRegistryStore};
use nexa_delivery_service::server::{create_app, AppState};
use nexa_delivery_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing (keep the guard alive for the process lifetime)
    let _telemetry_guard = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Connect to PostgreSQL
    let pool = create_pool(&settings.database).await?;
    tracing::info!("Database pool initialized");

    let store = Arc::new(PostgresQueueStore::new(pool.clone()));
    let ledger = Arc::new(PostgresCreditLedger::new(pool.clone()));
    let registry = Arc::new(BackendRegistry::new(Arc::new(PostgresRegistryStore::new(
        pool,
    ))));

    // A crashed processor leaves PROCESSING rows behind; recover them
    // before claiming starts
    let recovered = store.recover_stale_processing().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Recovered stale PROCESSING messages");
    }

    let loaded = registry.load().await?;
    tracing::info!(servers = loaded, "Backend registry loaded");

    // Create application state
    let state = AppState::new(settings.clone(), store, ledger, registry);
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start queue processor in background
    let processor = QueueProcessor::new(
        state.store.clone(),
        state.ledger.clone(),
        state.selector.clone(),
        Arc::new(HttpDeliveryExecutor::new(settings.delivery.clone())),
        state.processor_control.clone(),
    );
    let processor_shutdown = shutdown_tx.subscribe();
    let processor_handle = tokio::spawn(async move {
        processor.run(processor_shutdown).await;
    });

    // Start health monitor in background
    let monitor = HealthMonitor::new(
        settings.health.clone(),
        state.registry.clone(),
        state.prober.clone(),
        shutdown_tx.subscribe(),
    );
    let monitor_handle = tokio::spawn(async move {
        monitor.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(processor_handle, monitor_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the background tasks
    let _ = shutdown_tx.send(());
}
