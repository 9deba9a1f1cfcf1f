// src/api/http/health.rs

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::api::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "gateway": state.lifecycle.gateway_name(),
    }))
}
