// src/error.rs
// Error taxonomy for the session broker

use thiserror::Error;

/// Main error type for the broker library
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("provisioning failed: {reason}")]
    ProvisioningFailed { reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("capacity exceeded: at most {limit} concurrent sessions")]
    CapacityExceeded { limit: usize },
}

/// Convenience type alias for Result using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    pub fn provisioning(reason: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Session and instance lookups share one user-facing class
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::InstanceNotFound(_))
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        BrokerError::Storage(err.to_string())
    }
}
