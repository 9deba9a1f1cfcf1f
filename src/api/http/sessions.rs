// src/api/http/sessions.rs
// Session endpoints: create, get, delete, extend, per-user lookup

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::Session;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendQuery {
    #[serde(default = "default_extension_hours")]
    pub hours: i64,
}

fn default_extension_hours() -> i64 {
    1
}

pub async fn create_session(
    State(state): State<AppState>,
    Query(query): Query<CreateSessionQuery>,
) -> ApiResult<Json<Session>> {
    let session = state.lifecycle.create_session(query.user_id).await?;
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.lifecycle.get_session(&session_id).await?))
}

/// Always `{success: true}`, including for sessions that no longer exist
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.lifecycle.delete_session(&session_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn extend_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ExtendQuery>,
) -> ApiResult<Json<Session>> {
    let session = state.lifecycle.extend(&session_id, query.hours).await?;
    Ok(Json(session))
}

pub async fn user_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.lifecycle.user_session(&user_id).await?))
}
