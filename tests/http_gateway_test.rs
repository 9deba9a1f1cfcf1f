// tests/http_gateway_test.rs
// HTTP provider client against the mock provider server on an ephemeral port


use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nbcompute::gateway::{GatewayError, HttpGateway, MockGateway, ProvisioningGateway};
use nbcompute::lifecycle::LifecycleManager;
use nbcompute::mock_server;
use nbcompute::models::{InstanceStatus, ResourceHints, SessionStatus};
use nbcompute::store::Storage;

async fn spawn_provider() -> (SocketAddr, Arc<MockGateway>) {
    let upstream = Arc::new(MockGateway::new());
    let app = mock_server::router(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, upstream)
}

fn client(addr: SocketAddr) -> HttpGateway {
    HttpGateway::new(
        &format!("http://{addr}"),
        "test-key",
        "test-org",
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_catalog_over_http() {
    let (addr, _) = spawn_provider().await;
    let gateway = client(addr);

    let catalog = gateway.list_gpu_types().await.unwrap();
    assert_eq!(catalog.len(), 6);
    let t4 = catalog.iter().find(|g| g.id == "nvidia-t4").unwrap();
    assert_eq!(t4.memory, "16GB");
    assert_eq!(t4.compute_capability, "7.5");
    assert!(t4.available);
}

#[tokio::test]
async fn test_instance_lifecycle_over_http() {
    let (addr, upstream) = spawn_provider().await;
    let gateway = client(addr);

    let hints = ResourceHints {
        cpu_cores: 16,
        ram_gb: 64,
        ..ResourceHints::default()
    };
    let instance = gateway.provision("nvidia-a100-80gb", 2, &hints).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.gpu_count, 2);
    assert_eq!(instance.cpu_cores, 16);
    assert_eq!(upstream.instance_count(), 1);

    let id = instance.instance_id.clone();
    assert_eq!(gateway.get_status(&id).await.unwrap(), instance);

    gateway.stop(&id).await.unwrap();
    assert_eq!(
        gateway.get_status(&id).await.unwrap().status,
        InstanceStatus::Stopped
    );

    gateway.delete(&id).await.unwrap();
    assert_eq!(upstream.instance_count(), 0);

    // Already gone: absorbed for teardown, surfaced for status
    gateway.stop(&id).await.unwrap();
    gateway.delete(&id).await.unwrap();
    assert_eq!(
        gateway.get_status(&id).await.unwrap_err(),
        GatewayError::NotFound(id)
    );
}

#[tokio::test]
async fn test_unknown_gpu_rejected_by_provider() {
    let (addr, _) = spawn_provider().await;
    let gateway = client(addr);

    let err = gateway
        .provision("nvidia-b200", 1, &ResourceHints::default())
        .await
        .unwrap_err();
    match err {
        GatewayError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert!(message.starts_with("Invalid GPU type"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_provider_requires_authorization() {
    let (addr, _) = spawn_provider().await;
    let response = reqwest::get(format!("http://{addr}/v1/compute/instances"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr).list_gpu_types().await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn test_lifecycle_through_http_gateway() {
    let (addr, upstream) = spawn_provider().await;
    let lifecycle = LifecycleManager::new(
        Storage::memory(),
        Arc::new(client(addr)),
        test_helpers::test_settings(),
    );
    assert_eq!(lifecycle.gateway_name(), "http");

    let session = lifecycle.create_session(Some("gina".into())).await.unwrap();
    let session = lifecycle
        .select_compute(&session.session_id, "nvidia-t4", 1)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(upstream.instance_count(), 1);

    lifecycle.delete_session(&session.session_id).await.unwrap();
    assert_eq!(upstream.instance_count(), 0);
    assert!(lifecycle.orphaned_resources().is_empty());
}
