use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::credit::CreditShortfall;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient credit: requested {} (subscription remaining {}, voucher remaining {})",
        .0.requested, .0.subscription_remaining, .0.voucher_remaining)]
    InsufficientCredit(CreditShortfall),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<crate::queue::QueueStoreError> for AppError {
    fn from(err: crate::queue::QueueStoreError) -> Self {
        match err {
            crate::queue::QueueStoreError::NotFound(id) => AppError::NotFound(format!("message {id}")),
            crate::queue::QueueStoreError::Postgres(e) => AppError::Database(e),
        }
    }
}

impl From<crate::registry::RegistryStoreError> for AppError {
    fn from(err: crate::registry::RegistryStoreError) -> Self {
        match err {
            crate::registry::RegistryStoreError::ServerNotFound(id) => {
                AppError::NotFound(format!("server {id}"))
            }
            crate::registry::RegistryStoreError::DeviceNotBound(device) => {
                AppError::NotFound(format!("binding for device {device}"))
            }
            crate::registry::RegistryStoreError::Postgres(e) => AppError::Database(e),
            crate::registry::RegistryStoreError::Serialization(e) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<crate::credit::CreditError> for AppError {
    fn from(err: crate::credit::CreditError) -> Self {
        match err {
            crate::credit::CreditError::Insufficient(shortfall) => {
                AppError::InsufficientCredit(shortfall)
            }
            crate::credit::CreditError::UnknownTenant(t) => AppError::NotFound(format!("tenant {t}")),
            crate::credit::CreditError::Postgres(e) => AppError::Database(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit: Option<CreditShortfall>,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut credit = None;

        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                msg.clone(),
            ),
            AppError::InsufficientCredit(shortfall) => {
                credit = Some(shortfall.clone());
                let msg = self.to_string();
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDIT", msg.clone(), msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
            AppError::Database(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Service temporarily unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
                credit,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
