// src/api/http/compute.rs
// Compute endpoints: catalog, selection, instance status and stop

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::lifecycle::InstanceSummary;
use crate::lifecycle::orphans::OrphanedResource;
use crate::models::{GpuType, Instance, SessionStatus};

#[derive(Debug, Deserialize)]
pub struct SelectComputeRequest {
    pub gpu_type: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

fn default_gpu_count() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectComputeResponse {
    pub session_id: String,
    pub instance_id: String,
    pub status: SessionStatus,
    pub message: String,
}

pub async fn list_gpu_types(State(state): State<AppState>) -> ApiResult<Json<Vec<GpuType>>> {
    Ok(Json(state.lifecycle.list_gpu_types().await?))
}

/// Provision into the given session, or into a fresh one when no id is sent
pub async fn select_compute(
    State(state): State<AppState>,
    Json(request): Json<SelectComputeRequest>,
) -> ApiResult<Json<SelectComputeResponse>> {
    let lifecycle = &state.lifecycle;

    let (session_id, implicit) = match request.session_id {
        Some(id) => (id, false),
        None => {
            let session = lifecycle.create_session(request.user_id.clone()).await?;
            (session.session_id, true)
        }
    };

    let session = match lifecycle
        .select_compute(&session_id, &request.gpu_type, request.gpu_count)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            // A session created just for this request is not left behind
            if implicit && let Err(cleanup) = lifecycle.delete_session(&session_id).await {
                warn!(session_id = %session_id, error = %cleanup, "Failed to discard implicit session");
            }
            return Err(e.into());
        }
    };

    Ok(Json(SelectComputeResponse {
        instance_id: session.instance_id.unwrap_or_default(),
        session_id: session.session_id,
        status: session.status,
        message: format!(
            "Successfully provisioned {} x{}",
            request.gpu_type, request.gpu_count
        ),
    }))
}

pub async fn list_instances(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<InstanceSummary>>> {
    Ok(Json(state.lifecycle.list_instances().await?))
}

pub async fn instance_status(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.lifecycle.refresh_instance(&instance_id).await?))
}

pub async fn stop_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.lifecycle.stop_instance(&instance_id).await?;
    Ok(Json(json!({
        "instance_id": instance_id,
        "message": "Instance stopped successfully"
    })))
}

pub async fn list_orphans(State(state): State<AppState>) -> Json<Vec<OrphanedResource>> {
    Json(state.lifecycle.orphaned_resources())
}
