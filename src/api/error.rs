// src/api/error.rs
// Error responses for the HTTP API

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

use crate::error::BrokerError;

/// Standard API error response format
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
    pub error_code: Option<String>,
}

impl ApiError {
    fn with_code(status_code: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            error_code: Some(code.to_string()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Live session cap reached
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED", message)
    }

    /// The upstream provider failed or timed out
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_GATEWAY, "PROVISIONING_FAILED", message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response_json = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16()
        });

        if let Some(error_code) = self.error_code {
            response_json["error_code"] = json!(error_code);
        }

        (self.status_code, Json(response_json)).into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::SessionNotFound(_) | BrokerError::InstanceNotFound(_) => {
                Self::not_found(message)
            }
            BrokerError::InvalidArgument(_) => Self::bad_request(message),
            BrokerError::CapacityExceeded { .. } => Self::too_many_requests(message),
            BrokerError::ProvisioningFailed { .. } => {
                warn!("{}", message);
                Self::bad_gateway(message)
            }
            BrokerError::Storage(_) => {
                error!("{}", message);
                Self::internal("Storage unavailable")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_mapping() {
        let cases = [
            (BrokerError::SessionNotFound("s".into()), StatusCode::NOT_FOUND),
            (BrokerError::InstanceNotFound("i".into()), StatusCode::NOT_FOUND),
            (BrokerError::invalid("bad"), StatusCode::BAD_REQUEST),
            (BrokerError::CapacityExceeded { limit: 1 }, StatusCode::TOO_MANY_REQUESTS),
            (BrokerError::provisioning("down"), StatusCode::BAD_GATEWAY),
            (BrokerError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code, status);
        }
    }

    #[test]
    fn test_storage_details_not_leaked() {
        let err = ApiError::from(BrokerError::Storage("/var/lib/db locked".into()));
        assert!(!err.message.contains("/var/lib"));
        assert_eq!(err.error_code.as_deref(), Some("INTERNAL_ERROR"));
    }
}
