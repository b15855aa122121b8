use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::devices::{bind_device, get_binding, unbind_device};
use super::health::{health, metrics, stats};
use super::messages::{
    delete_message, get_message, list_messages, requeue_message, sent_log, submit_bulk,
    submit_message,
};
use super::queue_admin::{
    clear_queue, get_settings, pause_processor, resume_processor, update_settings,
};
use super::servers::{
    check_server, create_server, delete_server, get_server, list_servers, select_server,
    update_server,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Messages
                .route("/messages", post(submit_message).get(list_messages))
                .route("/messages/bulk", post(submit_bulk))
                .route("/messages/sent-log", get(sent_log))
                .route("/messages/{id}", get(get_message).delete(delete_message))
                .route("/messages/{id}/requeue", post(requeue_message))
                // Processor controls
                .route("/queue/pause", post(pause_processor))
                .route("/queue/resume", post(resume_processor))
                .route("/queue/settings", get(get_settings).put(update_settings))
                .route("/queue/clear", post(clear_queue))
                // Backend servers
                .route("/servers", get(list_servers).post(create_server))
                .route("/servers/select", post(select_server))
                .route(
                    "/servers/{id}",
                    get(get_server).put(update_server).delete(delete_server),
                )
                .route("/servers/{id}/check", post(check_server))
                // Device bindings
                .route("/devices/bind", post(bind_device))
                .route(
                    "/devices/{device}",
                    get(get_binding).delete(unbind_device),
                ),
        )
}
