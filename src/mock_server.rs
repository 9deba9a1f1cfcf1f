// src/mock_server.rs
// Stand-in for the upstream compute provider API, backed by `MockGateway`.
// Lets the HTTP gateway be exercised end to end without real credentials.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::gateway::{GatewayError, MockGateway};
use crate::models::{Instance, ResourceHints};

type Upstream = Arc<MockGateway>;

/// Error body in the provider's `{detail}` shape
struct Rejection {
    status: StatusCode,
    detail: String,
}

impl Rejection {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<GatewayError> for Rejection {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Instance not found"),
            GatewayError::Rejected { status, message } => Self::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message,
            ),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

type MockResult<T> = Result<T, Rejection>;

fn authorize(headers: &HeaderMap) -> MockResult<()> {
    if headers.contains_key(AUTHORIZATION) {
        Ok(())
    } else {
        Err(Rejection::new(
            StatusCode::UNAUTHORIZED,
            "Missing authorization header",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CreateInstanceRequest {
    gpu_type: String,
    #[serde(default = "one")]
    gpu_count: u32,
    #[serde(default)]
    cpu_cores: Option<u32>,
    #[serde(default)]
    ram_gb: Option<u32>,
    #[serde(default)]
    user_id: Option<String>,
}

fn one() -> u32 {
    1
}

pub fn router(upstream: Upstream) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/compute/gpu-types", get(gpu_types))
        .route(
            "/v1/compute/instances",
            get(list_instances).post(create_instance),
        )
        .route(
            "/v1/compute/instances/{instance_id}",
            get(get_instance).delete(delete_instance),
        )
        .route("/v1/compute/instances/{instance_id}/stop", post(stop_instance))
        .layer(TraceLayer::new_for_http())
        .with_state(upstream)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Mock compute provider",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational"
    }))
}

async fn health(State(upstream): State<Upstream>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "mock-provider",
        "instances_count": upstream.instance_count()
    }))
}

async fn gpu_types(State(upstream): State<Upstream>, headers: HeaderMap) -> MockResult<Json<Value>> {
    authorize(&headers)?;
    Ok(Json(json!({ "gpu_types": upstream.catalog() })))
}

async fn create_instance(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(request): Json<CreateInstanceRequest>,
) -> MockResult<Json<Instance>> {
    authorize(&headers)?;

    let defaults = ResourceHints::default();
    let hints = ResourceHints {
        cpu_cores: request.cpu_cores.unwrap_or(defaults.cpu_cores),
        ram_gb: request.ram_gb.unwrap_or(defaults.ram_gb),
        user_id: request.user_id,
        ..defaults
    };
    let instance = upstream.create_instance(&request.gpu_type, request.gpu_count, &hints)?;
    info!(instance_id = %instance.instance_id, gpu_type = %instance.gpu_type, "Mock instance created");
    Ok(Json(instance))
}

async fn list_instances(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
) -> MockResult<Json<Value>> {
    authorize(&headers)?;
    let instances = upstream.instances();
    Ok(Json(json!({
        "count": instances.len(),
        "instances": instances,
    })))
}

async fn get_instance(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
) -> MockResult<Json<Instance>> {
    authorize(&headers)?;
    Ok(Json(upstream.find_instance(&instance_id)?))
}

async fn stop_instance(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
) -> MockResult<Json<Value>> {
    authorize(&headers)?;
    let instance = upstream.stop_instance(&instance_id)?;
    Ok(Json(json!({
        "instance_id": instance.instance_id,
        "status": instance.status,
        "message": "Instance stopped successfully"
    })))
}

async fn delete_instance(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
) -> MockResult<Json<Value>> {
    authorize(&headers)?;
    upstream.remove_instance(&instance_id)?;
    Ok(Json(json!({
        "instance_id": instance_id,
        "message": "Instance deleted successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_requires_authorization() {
        let app = router(Arc::new(MockGateway::new()));
        let (status, body) = call(
            app,
            Request::get("/v1/compute/gpu-types").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Missing authorization header");
    }

    #[tokio::test]
    async fn test_unknown_gpu_type_is_bad_request() {
        let app = router(Arc::new(MockGateway::new()));
        let (status, body) = call(
            app,
            Request::post("/v1/compute/instances")
                .header("authorization", "Bearer test")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"gpu_type":"nvidia-b200","gpu_count":1}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("nvidia-t4"));
    }

    #[tokio::test]
    async fn test_delete_unknown_instance_is_not_found() {
        let app = router(Arc::new(MockGateway::new()));
        let (status, _) = call(
            app,
            Request::delete("/v1/compute/instances/inst-missing")
                .header("authorization", "Bearer test")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
