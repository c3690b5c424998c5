use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use factory_core::error::CoreError;
use factory_queue::QueueError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `factory_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from the queue engine or reconciler.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::Queue(queue) => match queue {
                QueueError::Core(core) => classify_core_error(core),
                QueueError::Database(err) => classify_sqlx_error(err),
                QueueError::Serialization(err) => {
                    tracing::error!(error = %err, "Payload serialization error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
                QueueError::Provider(err) => {
                    tracing::error!(error = %err, "Compute provider error");
                    (
                        StatusCode::BAD_GATEWAY,
                        "PROVIDER_ERROR",
                        "Compute provider request failed".to_string(),
                    )
                }
            },

            AppError::Database(err) => classify_sqlx_error(err),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a domain error to an HTTP status, error code, and message.
fn classify_core_error(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::AgentNotFound(agent_key) => (
            StatusCode::NOT_FOUND,
            "AGENT_NOT_FOUND",
            format!("No agent profile for key '{agent_key}'"),
        ),
        CoreError::AgentDisabled(agent_key) => (
            StatusCode::CONFLICT,
            "AGENT_DISABLED",
            format!("Agent '{agent_key}' is disabled"),
        ),
        CoreError::MissingProviderCredential(secret_ref) => (
            StatusCode::PRECONDITION_FAILED,
            "MISSING_PROVIDER_CREDENTIAL",
            format!("No active secret for '{secret_ref}'"),
        ),
        CoreError::MissingEndpoint(secret_ref) => (
            StatusCode::PRECONDITION_FAILED,
            "MISSING_QUEUE_ENDPOINT",
            format!("No active secret for '{secret_ref}'"),
        ),
        CoreError::UnsupportedProvider(kind) => (
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_PROVIDER",
            format!("Provider '{kind}' is not supported"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
