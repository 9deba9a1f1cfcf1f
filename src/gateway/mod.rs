// src/gateway/mod.rs
// Provisioning gateway abstraction - the boundary to the compute provider

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BrokerConfig;
use crate::models::{GpuType, Instance, ResourceHints};

pub mod http;
pub mod mock;

pub use http::HttpGateway;
pub use mock::MockGateway;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider call timed out")]
    Timeout,

    #[error("instance not found upstream: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Capability set the lifecycle manager consumes. Implemented by the real
/// HTTP provider client and by the in-process mock.
///
/// `stop` and `delete` must treat "already stopped / already gone" as success.
#[async_trait]
pub trait ProvisioningGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_gpu_types(&self) -> GatewayResult<Vec<GpuType>>;

    /// Must not return a partially-constructed instance on failure
    async fn provision(
        &self,
        gpu_type: &str,
        gpu_count: u32,
        hints: &ResourceHints,
    ) -> GatewayResult<Instance>;

    async fn get_status(&self, instance_id: &str) -> GatewayResult<Instance>;

    async fn stop(&self, instance_id: &str) -> GatewayResult<()>;

    async fn delete(&self, instance_id: &str) -> GatewayResult<()>;
}

/// Pick the gateway variant once, at construction time
pub fn build_gateway(config: &BrokerConfig) -> GatewayResult<Arc<dyn ProvisioningGateway>> {
    if config.mock_mode {
        tracing::info!("Running in MOCK MODE - using in-process provider");
        Ok(Arc::new(MockGateway::new()))
    } else {
        tracing::info!(url = %config.api_url, "Using HTTP provider");
        Ok(Arc::new(HttpGateway::from_config(config)?))
    }
}
