// tests/http_api_test.rs


use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use nbcompute::lifecycle::LifecycleSettings;
use nbcompute::models::Session;
use nbcompute::store::Storage;
use serde_json::{Value, json};
use tower::ServiceExt;

use test_helpers::{app, harness, harness_with, test_settings};

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness();
    let app = app(&h);

    for uri in ["/", "/health"] {
        let (status, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test]
async fn test_session_crud_flow() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(&app, "POST", "/api/sessions/create?user_id=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    assert_eq!(body["user_id"], "alice");
    assert!(body["instance_id"].is_null());
    let session: Session = serde_json::from_value(body).unwrap();

    let uri = format!("/api/sessions/{}", session.session_id);
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session.session_id.as_str());

    let (status, body) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    // Idempotent
    let (status, body) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], true);
    assert_eq!(body["status"], 404);
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_select_compute_for_existing_session() {
    let h = harness();
    let app = app(&h);
    let session = h.lifecycle.create_session(None).await.unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/api/compute/select",
        Some(json!({ "session_id": session.session_id, "gpu_type": "nvidia-t4", "gpu_count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session.session_id.as_str());
    assert_eq!(body["status"], "active");
    assert_eq!(body["message"], "Successfully provisioned nvidia-t4 x2");
    let instance_id = body["instance_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", "/api/compute/instances", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], instance_id.as_str());
    assert_eq!(body[0]["gpu_type"], "nvidia-t4");
}

#[tokio::test]
async fn test_select_without_session_creates_one() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(
        &app,
        "POST",
        "/api/compute/instances",
        Some(json!({ "gpu_type": "nvidia-l4", "user_id": "erin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully provisioned nvidia-l4 x1");
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", "/api/users/erin/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id.as_str());
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_failed_implicit_select_discards_session() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(
        &app,
        "POST",
        "/api/compute/select",
        Some(json!({ "gpu_type": "nvidia-b200", "user_id": "frank" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "BAD_REQUEST");
    assert!(h.lifecycle.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_select_errors_map_to_status_codes() {
    let h = harness();
    let app = app(&h);

    let (status, _) = send(
        &app,
        "POST",
        "/api/compute/select",
        Some(json!({ "session_id": "missing", "gpu_type": "nvidia-t4" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let session = h.lifecycle.create_session(None).await.unwrap();
    let (status, _) = send(
        &app,
        "POST",
        "/api/compute/select",
        Some(json!({ "session_id": session.session_id, "gpu_type": "nvidia-t4", "gpu_count": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.gateway.set_fail_provision(true);
    let (status, body) = send(
        &app,
        "POST",
        "/api/compute/select",
        Some(json!({ "session_id": session.session_id, "gpu_type": "nvidia-t4" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_code"], "PROVISIONING_FAILED");

    let unchanged = h.lifecycle.get_session(&session.session_id).await.unwrap();
    assert_eq!(unchanged, session);
}

#[tokio::test]
async fn test_extend_session() {
    let h = harness();
    let app = app(&h);
    let session = h.lifecycle.create_session(None).await.unwrap();

    let uri = format!("/api/sessions/{}/extend", session.session_id);
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let extended: Session = serde_json::from_value(body).unwrap();
    assert_eq!(
        extended.expires_at,
        session.expires_at + chrono::Duration::hours(1)
    );

    let (status, _) = send(&app, "POST", &format!("{uri}?hours=0"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/sessions/missing/extend?hours=2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_capacity_exceeded_is_429() {
    let settings = LifecycleSettings {
        max_sessions: 1,
        ..test_settings()
    };
    let h = harness_with(Storage::memory(), settings);
    let app = app(&h);

    let (status, _) = send(&app, "POST", "/api/sessions/create", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/api/sessions/create", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "CAPACITY_EXCEEDED");
}

#[tokio::test]
async fn test_gpu_catalog_aliases() {
    let h = harness();
    let app = app(&h);

    let (_, available) = send(&app, "GET", "/api/compute/available", None).await;
    let (_, gpu_types) = send(&app, "GET", "/api/compute/gpu-types", None).await;
    assert_eq!(available, gpu_types);

    let ids: Vec<&str> = available
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 6);
    assert!(ids.contains(&"nvidia-h100"));
}

#[tokio::test]
async fn test_instance_status_and_stop() {
    let h = harness();
    let app = app(&h);
    let session = h.lifecycle.create_session(None).await.unwrap();
    let session = h
        .lifecycle
        .select_compute(&session.session_id, "nvidia-t4", 1)
        .await
        .unwrap();
    let instance_id = session.instance_id.unwrap();

    let uri = format!("/api/compute/instance/{instance_id}");
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["ip_address"].as_str().unwrap().starts_with("192.168."));

    let (status, body) = send(&app, "POST", &format!("{uri}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance_id"], instance_id.as_str());

    let (_, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(body["status"], "stopped");

    let (status, _) = send(&app, "GET", "/api/compute/instance/inst-unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_orphans_listing() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(&app, "GET", "/api/compute/orphans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let session = h.lifecycle.create_session(None).await.unwrap();
    h.lifecycle
        .select_compute(&session.session_id, "nvidia-t4", 1)
        .await
        .unwrap();
    h.gateway.set_fail_teardown(true);

    let uri = format!("/api/sessions/{}", session.session_id);
    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/api/compute/orphans", None).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["stage"], "stop");
    assert_eq!(events[0]["session_id"], session.session_id.as_str());
}
