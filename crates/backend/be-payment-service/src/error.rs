use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use be_remote_db::DbError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(DbError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    /// Short label for analytics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "validation",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::Conflict(_) => "conflict",
            PaymentError::Unauthorized(_) => "unauthorized",
            PaymentError::Forbidden(_) => "forbidden",
            PaymentError::Config(_) => "config",
            PaymentError::Gateway(_) => "gateway",
            PaymentError::Database(_) => "database",
            PaymentError::Internal(_) => "internal",
        }
    }
}

impl From<DbError> for PaymentError {
    fn from(err: DbError) -> Self {
        match err {
            err if err.is_not_found() => PaymentError::NotFound(err.to_string()),
            err if err.is_duplicate() => PaymentError::Conflict(err.to_string()),
            DbError::InvalidInput(msg) => PaymentError::Validation(msg),
            other => PaymentError::Database(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PaymentError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            PaymentError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            PaymentError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            PaymentError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            PaymentError::Gateway(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            PaymentError::Config(_) | PaymentError::Database(_) | PaymentError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        tracing::error!(%status, error = %self, "Payment service error");

        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}
