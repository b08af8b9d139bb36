//! Operator API regression tests.
//!
//! Drives releases end to end over HTTP against a topology built on the
//! in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use flipgate_api::{ApiState, build_router};
use flipgate_core::{DeploymentContext, FlipgateConfig};
use flipgate_health::ScriptedProber;
use flipgate_provision::{InMemoryBackend, Provisioner, RetryPolicy};
use flipgate_release::{ReleaseOrchestrator, ReleaseSettings};
use flipgate_state::StateStore;
use flipgate_topology::TopologyBuilder;

async fn test_router() -> Router {
    let cfg = FlipgateConfig::scaffold("Dev");
    let provisioner = Provisioner::new(
        DeploymentContext::from_config(&cfg.deployment),
        Arc::new(InMemoryBackend::new()),
        RetryPolicy::default(),
    );
    let topology = TopologyBuilder::from_config(provisioner, &cfg)
        .unwrap()
        .build()
        .await
        .unwrap();
    let settings = ReleaseSettings::from_config(cfg.release.as_ref());
    let gate = settings.health_gate(Arc::new(ScriptedProber::healthy()));
    let releases =
        ReleaseOrchestrator::new(&topology, gate, settings, StateStore::open_in_memory().unwrap()).unwrap();
    build_router(ApiState {
        releases,
        topology: Arc::new(topology),
    })
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn release_runs_to_completion_over_http() {
    let router = test_router().await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/services/backend/releases",
        Some(serde_json::json!({ "image": "backend:v2" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&router, "GET", &format!("/api/v1/releases/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "PENDING");

    tokio::time::sleep(Duration::from_secs(31)).await;
    let (_, body) = call(&router, "GET", &format!("/api/v1/releases/{id}"), None).await;
    assert_eq!(body["data"]["phase"], "BAKING");

    let (_, body) = call(&router, "GET", "/api/v1/topology", None).await;
    let internal = body["data"]["routers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Dev-alb-internal")
        .unwrap()
        .clone();
    assert_eq!(internal["listeners"][0]["target"], "backend-green");

    let (status, body) = call(&router, "POST", &format!("/api/v1/releases/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "COMPLETE");

    tokio::time::sleep(Duration::from_secs(69 * 60 + 1)).await;
    let (status, body) = call(&router, "GET", "/api/v1/services/backend/releases", None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["phase"], "COMPLETE");
    assert!(history[0]["archived_at"].is_u64());
}

#[tokio::test(start_paused = true)]
async fn rollback_over_http() {
    let router = test_router().await;
    let (_, body) = call(
        &router,
        "POST",
        "/api/v1/services/frontend/releases",
        Some(serde_json::json!({ "image": "frontend:v2" })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_secs(31 + 120)).await;
    let (status, body) = call(&router, "POST", &format!("/api/v1/releases/{id}/rollback"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "ROLLED_BACK");

    let (_, body) = call(&router, "GET", "/api/v1/topology", None).await;
    let public = body["data"]["routers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Dev-alb-ingress-frontend")
        .unwrap()
        .clone();
    assert_eq!(public["listeners"][0]["target"], "frontend-blue");
}

#[tokio::test(start_paused = true)]
async fn operator_errors_map_to_status_codes() {
    let router = test_router().await;

    let (status, body) = call(&router, "GET", "/api/v1/releases/backend-r9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let submit = || serde_json::json!({ "image": "backend:v2" });
    let (status, _) = call(&router, "POST", "/api/v1/services/backend/releases", Some(submit())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, body) = call(&router, "POST", "/api/v1/services/backend/releases", Some(submit())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("in progress"));

    let (status, _) = call(&router, "POST", "/api/v1/releases/backend-r1/rollback", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&router, "GET", "/api/v1/services/worker/releases", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
