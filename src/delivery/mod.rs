//! Delivery execution: the network call to a backend gateway.

mod normalize;
mod payload;

pub use normalize::normalize_destination;
pub use payload::shape_payload;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::DeliveryConfig;
use crate::metrics::DELIVERY_DURATION_SECONDS;
use crate::queue::QueuedMessage;
use crate::registry::BackendServer;

/// Failure classification for a delivery attempt.
///
/// Both variants are terminal for the attempt; the distinction is kept in
/// the stored error text for observability.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Timeout, connection failure or non-2xx status
    #[error("transport: {0}")]
    Transport(String),

    /// The gateway answered but reported a send failure
    #[error("backend: {0}")]
    Application(String),
}

/// Seam for the outbound send call, so the processor can be driven in
/// tests without a live gateway.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Send one message through the given backend. Returns the gateway's
    /// raw response body on success.
    async fn send(
        &self,
        backend: &BackendServer,
        message: &QueuedMessage,
    ) -> Result<Value, DeliveryError>;
}

/// HTTP delivery executor against the gateway send endpoint.
pub struct HttpDeliveryExecutor {
    client: reqwest::Client,
    config: DeliveryConfig,
}

impl HttpDeliveryExecutor {
    pub fn new(config: DeliveryConfig) -> Self {
        // Timeout enforced by the client itself: a hung gateway cancels
        // the call rather than stalling the processor cycle.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_seconds))
            .build()
            .expect("failed to build HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl Deliverer for HttpDeliveryExecutor {
    #[tracing::instrument(
        name = "delivery.send",
        skip(self, backend, message),
        fields(message_id = %message.id, device = %message.device, server = %backend.name)
    )]
    async fn send(
        &self,
        backend: &BackendServer,
        message: &QueuedMessage,
    ) -> Result<Value, DeliveryError> {
        let to = normalize_destination(
            &message.destination,
            &self.config.default_country_code,
            &self.config.address_suffix,
        );
        let envelope = shape_payload(message);

        let url = format!(
            "{}/api/v1/messages/send",
            backend.address.trim_end_matches('/')
        );

        let timer = DELIVERY_DURATION_SECONDS.start_timer();
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "device": message.device,
                "to": to,
                "message": envelope,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Transport(format!("timeout after {}s", self.config.send_timeout_seconds))
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;
        timer.observe_duration();

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Transport(format!(
                "HTTP {status}: {}",
                truncate(&body, 200)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("invalid response body: {e}")))?;

        // Gateways report application failures in a 2xx envelope
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("send rejected by gateway");
            return Err(DeliveryError::Application(reason.to_string()));
        }

        tracing::debug!(
            message_id = %message.id,
            server = %backend.name,
            "Message delivered"
        );

        Ok(body)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::queue::{MessageKind, MessageStatus};
    use crate::registry::{BackendServer, ServerStatus};

    use super::*;

    fn backend(address: &str) -> BackendServer {
        BackendServer {
            id: Uuid::new_v4(),
            name: "gw-1".to_string(),
            address: address.to_string(),
            max_instances: 1,
            max_users_per_instance: 10,
            priority: 0,
            weight: 0,
            enabled: true,
            status: ServerStatus::Active,
            probe_interval_seconds: None,
            last_health_check: None,
            last_connection: None,
            stats: None,
        }
    }

    fn text_message() -> QueuedMessage {
        let now = Utc::now();
        QueuedMessage {
            id: Uuid::new_v4(),
            tenant_id: "t".to_string(),
            device: "dev-1".to_string(),
            destination: "9876543210".to_string(),
            kind: MessageKind::Text,
            body: "hello".to_string(),
            attachment_url: None,
            filename: None,
            server_id: None,
            priority: 0,
            not_before: None,
            status: MessageStatus::Processing,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_send_posts_normalized_destination() {
        let mut mock_server = mockito::Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/api/v1/messages/send")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "device": "dev-1",
                "to": "919876543210@s.whatsapp.net",
                "message": { "text": "hello" },
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "id": "abc"}"#)
            .create_async()
            .await;

        let executor = HttpDeliveryExecutor::new(DeliveryConfig::default());
        let response = executor
            .send(&backend(&mock_server.url()), &text_message())
            .await
            .unwrap();

        assert_eq!(response["success"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_rejection_is_application_error() {
        let mut mock_server = mockito::Server::new_async().await;
        mock_server
            .mock("POST", "/api/v1/messages/send")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "error": "session disconnected"}"#)
            .create_async()
            .await;

        let executor = HttpDeliveryExecutor::new(DeliveryConfig::default());
        let err = executor
            .send(&backend(&mock_server.url()), &text_message())
            .await
            .unwrap_err();

        match err {
            DeliveryError::Application(reason) => assert_eq!(reason, "session disconnected"),
            other => panic!("expected application error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_is_transport_error() {
        let mut mock_server = mockito::Server::new_async().await;
        mock_server
            .mock("POST", "/api/v1/messages/send")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let executor = HttpDeliveryExecutor::new(DeliveryConfig::default());
        let err = executor
            .send(&backend(&mock_server.url()), &text_message())
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_error_text_keeps_classification() {
        let transport = DeliveryError::Transport("connection refused".to_string());
        let application = DeliveryError::Application("session disconnected".to_string());
        assert!(transport.to_string().starts_with("transport:"));
        assert!(application.to_string().starts_with("backend:"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("short", 200), "short");
    }
}
