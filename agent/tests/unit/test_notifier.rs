//! Status notifications against a local endpoint

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use openapi_client::models::{DeploymentNotificationStatus, DeploymentStatusNotification};
use tokio::net::TcpListener;

use scm_agent::deploy::notifier::PostDeploymentNotifier;
use scm_agent::http::client::HttpClient;

struct Endpoint {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    received: Mutex<Vec<DeploymentStatusNotification>>,
}

async fn update_deploy_status(
    State(endpoint): State<Arc<Endpoint>>,
    Json(body): Json<DeploymentStatusNotification>,
) -> StatusCode {
    endpoint.calls.fetch_add(1, Ordering::SeqCst);
    let failing = endpoint
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    endpoint.received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn start_endpoint(failures: usize) -> (String, Arc<Endpoint>) {
    let endpoint = Arc::new(Endpoint {
        failures_left: AtomicUsize::new(failures),
        calls: AtomicUsize::new(0),
        received: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/updatedeploystatus", post(update_deploy_status))
        .with_state(endpoint.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), endpoint)
}

fn notifier(base_url: &str, retries: u32) -> PostDeploymentNotifier {
    let client = HttpClient::new(base_url, Some("secret".to_string())).unwrap();
    PostDeploymentNotifier::new(Arc::new(client), retries, Duration::from_millis(10))
}

#[tokio::test]
async fn test_notification_retries_until_accepted() {
    let (base_url, endpoint) = start_endpoint(2).await;

    let sent = notifier(&base_url, 3)
        .notify("temp-1234abcd", DeploymentNotificationStatus::BuildSuccessful)
        .await;

    assert!(sent);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
    let received = endpoint.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].deployment_id, "temp-1234abcd");
}

#[tokio::test]
async fn test_notification_gives_up_after_retries() {
    let (base_url, endpoint) = start_endpoint(10).await;

    let sent = notifier(&base_url, 3)
        .notify("c1", DeploymentNotificationStatus::BuildFailed)
        .await;

    assert!(!sent);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_disabled_notifier_sends_nothing() {
    let sent = PostDeploymentNotifier::disabled()
        .notify("c1", DeploymentNotificationStatus::BuildInProgress)
        .await;
    assert!(!sent);
}
