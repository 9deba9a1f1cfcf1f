// src/gateway/http.rs
// HTTP client for the compute provider API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GatewayError, GatewayResult, ProvisioningGateway};
use crate::config::BrokerConfig;
use crate::models::{GpuType, Instance, ResourceHints};

#[derive(Deserialize)]
struct GpuTypesResponse {
    gpu_types: Vec<GpuType>,
}

#[derive(Serialize)]
struct ProvisionRequest<'a> {
    gpu_type: &'a str,
    gpu_count: u32,
    cpu_cores: u32,
    ram_gb: u32,
    user_id: Option<&'a str>,
    environment: &'a str,
    frameworks: &'a [String],
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    provision_timeout: Duration,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        api_key: &str,
        org_id: &str,
        request_timeout: Duration,
        provision_timeout: Duration,
    ) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| GatewayError::Transport(format!("invalid api key header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Organization-ID",
            HeaderValue::from_str(org_id)
                .map_err(|e| GatewayError::Transport(format!("invalid org id header: {e}")))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            provision_timeout,
        })
    }

    pub fn from_config(config: &BrokerConfig) -> GatewayResult<Self> {
        Self::new(
            &config.api_url,
            &config.api_key,
            &config.org_id,
            config.gateway_timeout,
            config.provision_timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/compute{}", self.base_url, path)
    }

    /// Turn a non-success response into a typed rejection
    async fn rejection(response: Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.detail)
            .unwrap_or(body);
        GatewayError::Rejected { status, message }
    }

    async fn parse_instance(response: Response) -> GatewayResult<Instance> {
        let instance: Instance = response.json().await?;
        if instance.instance_id.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "instance_id missing from provider response".to_string(),
            ));
        }
        Ok(instance)
    }

    /// Shared path for stop/delete: 404 means the instance is already gone
    async fn absorb_missing(
        &self,
        response: GatewayResult<Response>,
        instance_id: &str,
        action: &str,
    ) -> GatewayResult<()> {
        let response = response?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(instance_id, action, "instance already gone upstream");
                Ok(())
            }
            _ => {
                let err = Self::rejection(response).await;
                warn!(instance_id, action, error = %err, "provider refused teardown");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ProvisioningGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn list_gpu_types(&self) -> GatewayResult<Vec<GpuType>> {
        let response = self.client.get(self.url("/gpu-types")).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let body: GpuTypesResponse = response.json().await?;
        Ok(body.gpu_types)
    }

    async fn provision(
        &self,
        gpu_type: &str,
        gpu_count: u32,
        hints: &ResourceHints,
    ) -> GatewayResult<Instance> {
        let request = ProvisionRequest {
            gpu_type,
            gpu_count,
            cpu_cores: hints.cpu_cores,
            ram_gb: hints.ram_gb,
            user_id: hints.user_id.as_deref(),
            environment: &hints.environment,
            frameworks: &hints.frameworks,
        };

        let response = self
            .client
            .post(self.url("/instances"))
            .timeout(self.provision_timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Self::parse_instance(response).await
    }

    async fn get_status(&self, instance_id: &str) -> GatewayResult<Instance> {
        let response = self
            .client
            .get(self.url(&format!("/instances/{}", instance_id)))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Self::parse_instance(response).await,
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(instance_id.to_string())),
            _ => Err(Self::rejection(response).await),
        }
    }

    async fn stop(&self, instance_id: &str) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/instances/{}/stop", instance_id)))
            .send()
            .await
            .map_err(GatewayError::from);
        self.absorb_missing(response, instance_id, "stop").await
    }

    async fn delete(&self, instance_id: &str) -> GatewayResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/instances/{}", instance_id)))
            .send()
            .await
            .map_err(GatewayError::from);
        self.absorb_missing(response, instance_id, "delete").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building_trims_slash() {
        let gateway = HttpGateway::new(
            "http://provider:9000/",
            "key",
            "org",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            gateway.url("/instances/abc"),
            "http://provider:9000/v1/compute/instances/abc"
        );
    }

    #[test]
    fn test_rejects_unencodable_header() {
        let result = HttpGateway::new(
            "http://provider",
            "bad\nkey",
            "org",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(GatewayError::Transport(_))));
    }
}
