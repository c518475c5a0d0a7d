use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;

use crate::paystack::GatewayError;
use crate::ports::RepositoryError;
use crate::provisioning::ProvisioningError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        balance: BigDecimal,
        required: BigDecimal,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service temporarily unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Provisioning error: {0}")]
    Provisioning(ProvisioningError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Gateway(_) | AppError::Provisioning(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the caller. Upstream failure details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Gateway(_) | AppError::Provisioning(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::UpstreamUnavailable(_) => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::InsufficientFunds { balance, required } => {
                AppError::InsufficientFunds { balance, required }
            }
            RepositoryError::Conflict(msg) => AppError::Conflict(msg),
            RepositoryError::Database(e) => AppError::Database(e.to_string()),
            RepositoryError::Storage(msg) => AppError::Database(msg),
        }
    }
}

impl From<ProvisioningError> for AppError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::Unavailable(msg) | ProvisioningError::CircuitOpen(msg) => {
                AppError::UpstreamUnavailable(msg)
            }
            other => AppError::Provisioning(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
