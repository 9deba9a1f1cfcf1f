// src/api/http/mod.rs
// Router composition for the REST API

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::state::AppState;

pub mod compute;
pub mod health;
pub mod sessions;

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let api_router = Router::new()
        // Sessions
        .route("/sessions/create", post(sessions::create_session))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{session_id}/extend", post(sessions::extend_session))
        .route("/users/{user_id}/session", get(sessions::user_session))
        // Compute
        .route("/compute/available", get(compute::list_gpu_types))
        .route("/compute/gpu-types", get(compute::list_gpu_types))
        .route("/compute/select", post(compute::select_compute))
        .route(
            "/compute/instances",
            get(compute::list_instances).post(compute::select_compute),
        )
        .route("/compute/instance/{instance_id}", get(compute::instance_status))
        .route("/compute/instance/{instance_id}/stop", post(compute::stop_instance))
        .route("/compute/orphans", get(compute::list_orphans));

    Router::new()
        .route("/", get(health::health))
        .route("/health", get(health::health))
        .nest("/api", api_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(allowed_origins)),
        )
        .with_state(state)
}
