//! HTTP API through the router

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use scm_agent::server::serve::router;
use scm_agent::server::state::ServerState;
use scm_agent::storage::settings::Settings;

use crate::support::{FakeFetcher, TestSite};

async fn app(site: &TestSite) -> Router {
    let manager = site.manager().await;
    router(Arc::new(ServerState::new(manager, Arc::new(FakeFetcher::default()))))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn deploy(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let site = TestSite::new(Settings::default()).await;
    let app = app(&site).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "scm-agent");
}

#[tokio::test]
async fn test_deploy_then_read_back() {
    let site = TestSite::new(Settings::default()).await;
    site.repository.set_head("c1");
    let app = app(&site).await;

    let (status, body) = send(&app, deploy("/api/deploy", r#"{"deployer":"github"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ranSynchronously");
    assert!(body["trackingId"].as_str().unwrap().starts_with("temp-"));

    let (status, body) = send(&app, get("/api/deployments/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "c1");
    assert_eq!(body["status"], "success");
    assert_eq!(body["deployer"], "github");
    assert_eq!(body["active"], true);

    let (status, body) = send(&app, get("/api/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    // The active deployment cannot be deleted
    let request = Request::delete("/api/deployments/c1").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_scm_disabled_is_forbidden() {
    let site = TestSite::new(Settings {
        scm_enabled: false,
        ..Settings::default()
    })
    .await;
    let app = app(&site).await;

    let (status, body) = send(&app, deploy("/api/deploy", "{}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["result"], "forbiddenScmDisabled");
}

#[tokio::test]
async fn test_contended_deploy_is_accepted_when_deferrable() {
    let site = TestSite::new(Settings::default()).await;
    let app = app(&site).await;
    let holder = site.env.open_locks();
    assert!(holder.deployment().lock("another process"));

    let (status, body) = send(&app, deploy("/api/deploy", r#"{"allowDeferred":true}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["result"], "pending");

    let (status, body) = send(&app, deploy("/api/deploy", "{}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["result"], "conflictDeploymentInProgress");

    let (status, body) = send(&app, get("/api/locks/deployment")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["held"], true);

    holder.deployment().release();
}

#[tokio::test]
async fn test_unknown_resources_are_not_found() {
    let site = TestSite::new(Settings::default()).await;
    let app = app(&site).await;

    let (status, _) = send(&app, get("/api/deployments/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/deployments/active")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/locks/bogus")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/api/locks/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["held"], false);
}
