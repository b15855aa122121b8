//! Enqueue accounting over the HTTP surface.
//!
//! Lives in its own test binary on purpose: the enqueue counter is
//! process-global, so the exact-delta assertion must not share a process
//! with other tests that enqueue.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use nexa_delivery_service::config::{DatabaseConfig, Settings};
use nexa_delivery_service::credit::{CreditPool, MemoryCreditLedger};
use nexa_delivery_service::metrics::QUEUE_ENQUEUED_TOTAL;
use nexa_delivery_service::queue::MemoryQueueStore;
use nexa_delivery_service::registry::{BackendRegistry, MemoryRegistryStore};
use nexa_delivery_service::server::{create_app, AppState};

fn test_settings() -> Settings {
    Settings {
        server: Default::default(),
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            pool_size: 1,
            connect_timeout_seconds: 1,
            idle_timeout_seconds: 1,
        },
        processor: Default::default(),
        health: Default::default(),
        delivery: Default::default(),
        bulk: Default::default(),
        otel: Default::default(),
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_enqueue_counted_once_per_accepted_message() {
    let ledger = Arc::new(MemoryCreditLedger::new());
    ledger
        .set_pool(CreditPool {
            tenant_id: "tenant-a".to_string(),
            subscription_quota_total: 100,
            subscription_quota_used: 0,
            voucher_balance: 0,
        })
        .await;

    let state = AppState::new(
        test_settings(),
        Arc::new(MemoryQueueStore::new()),
        ledger,
        Arc::new(BackendRegistry::new(Arc::new(MemoryRegistryStore::new()))),
    );
    let app = create_app(state);

    let before = QUEUE_ENQUEUED_TOTAL.get();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/messages",
            json!({
                "tenant_id": "tenant-a",
                "device": "dev-1",
                "destination": "9876543210",
                "body": "hello",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_json(
            "/api/v1/messages/bulk",
            json!({
                "tenant_id": "tenant-a",
                "device": "dev-1",
                "messages": [
                    { "destination": "9876543211", "body": "a" },
                    { "destination": "9876543212", "body": "b" },
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // 3 accepted messages, one increment each
    assert_eq!(QUEUE_ENQUEUED_TOTAL.get() - before, 3);
}
