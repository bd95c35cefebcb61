//! HTTP surface tests: management endpoints and function execution

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use tower::ServiceExt;

use warden::app::options::AppOptions;
use warden::app::state::{AppState, Components};
use warden::build::lock::MemoryBuildLock;
use warden::server::handlers::{DeployResponse, RouteEntry};
use warden::server::serve::router;
use warden::server::state::ServerState;
use warden::storage::layout::StorageLayout;
use warden::storage::settings::Settings;

use crate::fakes::{free_port_range, FakeCheckout, FakeEngine, FakeRegistry};

struct Harness {
    app: Router,
    engine: Arc<FakeEngine>,
    state: Arc<AppState>,
    _work: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(|_| {})
    }

    fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let work = tempfile::tempdir().unwrap();
        let (port_min, port_max) = free_port_range(20);

        let mut settings = Settings::default();
        settings.deploy.port_min = port_min;
        settings.deploy.port_max = port_max;
        settings.deploy.port_scan_timeout_secs = 5;
        configure(&mut settings);
        let options = AppOptions::from_settings(&settings, StorageLayout::new(work.path()));

        let engine = Arc::new(FakeEngine::default());
        let components = Components {
            engine: engine.clone(),
            registry: Arc::new(FakeRegistry::default()),
            checkout: Arc::new(FakeCheckout::default()),
            lock: Arc::new(MemoryBuildLock::new()),
        };
        let state = Arc::new(AppState::assemble(&options, components).unwrap());
        let server_state = ServerState::new(
            state.routes.clone(),
            state.manager.clone(),
            state.builder.clone(),
            Duration::from_secs(10),
        );
        Self {
            app: router(Arc::new(server_state)),
            engine,
            state,
            _work: work,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn call(&self, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, String::from_utf8(body).unwrap())
    }

    async fn deploy(&self, alias: &str) -> DeployResponse {
        let (status, body) = self
            .json(
                "POST",
                "/deployments",
                serde_json::json!({ "project": "demo", "alias": alias, "commit_hash": "abc12345" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = h.call("GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn test_deploy_then_execute() {
    let h = Harness::new();
    let deployed = h.deploy("").await;
    assert_eq!(deployed.address, "demo");

    let (status, body) = h.call("GET", "/e/demo?name=warden", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "localhost:5000/demo:abc12345 GET name=warden ");

    let (status, body) = h.call("POST", "/e/demo/latest", "payload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "localhost:5000/demo:abc12345 POST  payload");
}

#[tokio::test]
async fn test_alias_routes_are_independent() {
    let h = Harness::new();
    let default = h.deploy("").await;
    let v2 = h.deploy("v2").await;
    assert_ne!(default.endpoint, v2.endpoint);

    let (_, body) = h.call("GET", "/routes", "").await;
    let routes: Vec<RouteEntry> = serde_json::from_str(&body).unwrap();
    let addresses: Vec<&str> = routes.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(addresses, vec!["demo", "demo/v2"]);

    let (status, _) = h
        .json(
            "DELETE",
            "/deployments",
            serde_json::json!({ "project": "demo", "alias": "v2", "commit_hash": "abc12345" }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(h.state.routes.get("demo/v2"), "");
    assert_eq!(h.state.routes.get("demo"), default.endpoint);
    let (status, _) = h.call("GET", "/e/demo", "").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.call("GET", "/e/demo/v2", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_stop_without_instances_removes_route() {
    let h = Harness::new();
    h.state.routes.set("demo", "127.0.0.1:1");

    let (status, _) = h
        .json(
            "DELETE",
            "/deployments",
            serde_json::json!({ "project": "demo", "commit_hash": "abc12345" }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.state.routes.get("demo"), "");
}

#[tokio::test]
async fn test_execute_not_deployed() {
    let h = Harness::new();
    let (status, body) = h.call("GET", "/e/ghost", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("ghost"));
}

#[tokio::test]
async fn test_execute_rejects_other_methods() {
    let h = Harness::new();
    h.deploy("").await;
    for method in ["PUT", "DELETE", "PATCH"] {
        let (status, _) = h.call(method, "/e/demo", "x").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}

#[tokio::test]
async fn test_invalid_deployment_is_bad_request() {
    let h = Harness::new();
    let (status, body) = h
        .json(
            "POST",
            "/deployments",
            serde_json::json!({ "project": " ", "commit_hash": "abc12345", "min_replica": 3, "max_replica": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("project"));
    assert!(body.contains("max replica"));
    assert_eq!(h.engine.running(), 0);
}

#[tokio::test]
async fn test_image_build_endpoints() {
    let h = Harness::new();

    let (status, _) = h
        .json("POST", "/images", serde_json::json!({ "project": "demo" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = serde_json::json!({
        "name": "demo",
        "gitURL": "https://git.example.com/demo.git",
        "hash": "abcdef12",
        "username": "ci",
        "runEnv": "python",
        "handler": "main.handle"
    });
    let (status, body) = h.json("POST", "/images", request.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "started");

    let (status, body) = h.json("POST", "/images", request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "pending");

    let (status, _) = h
        .call(
            "GET",
            "/images/status?git_url=https%3A%2F%2Fgit.example.com%2Fother.git&hash=abcdef12",
            "",
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shutdown_stops_instances() {
    let h = Harness::new();
    h.deploy("").await;
    h.deploy("v2").await;
    assert_eq!(h.engine.running(), 2);

    h.state.shutdown().await.unwrap();
    assert_eq!(h.engine.running(), 0);
    assert!(h.state.routes.is_empty());
}

#[tokio::test]
async fn test_shutdown_keeps_other_files_in_work_dir() {
    let shared = tempfile::tempdir().unwrap();
    let neighbour = shared.path().join("precious.txt");
    std::fs::write(&neighbour, "not ours").unwrap();

    let work_dir = shared.path().to_string_lossy().to_string();
    let h = Harness::with_settings(|settings| settings.build.work_dir = Some(work_dir));
    let builds_dir = h.state.builds_dir.path().to_path_buf();
    assert!(builds_dir.starts_with(shared.path()));
    assert_ne!(builds_dir, shared.path());
    std::fs::create_dir_all(builds_dir.join("demo-leftover")).unwrap();

    h.state.shutdown().await.unwrap();
    assert!(neighbour.exists());
    assert!(shared.path().exists());
    assert!(!builds_dir.exists());
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let h = Harness::new();

    let not_json = Request::builder()
        .method("POST")
        .uri("/deployments")
        .header("content-type", "application/json")
        .body(Body::from("{ project: "))
        .unwrap();
    let untyped = Request::builder()
        .method("POST")
        .uri("/images")
        .body(Body::from(r#"{"name":"demo"}"#))
        .unwrap();
    let wrong_shape = Request::builder()
        .method("DELETE")
        .uri("/deployments")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"project": 7}"#))
        .unwrap();

    for request in [not_json, untyped, wrong_shape] {
        let (status, body) = h.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Validation error"));
    }

    let (status, body) = h.call("GET", "/images/status?hash=abcdef12", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("git_url"));
    assert_eq!(h.engine.running(), 0);
}
