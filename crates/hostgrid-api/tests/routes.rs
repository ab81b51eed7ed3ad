//! Router-level tests against an in-memory runtime and store.

use std::io::Write;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use hostgrid_api::{ApiState, build_router};
use hostgrid_core::Catalog;
use hostgrid_provision::{Orchestrator, OrchestratorSettings};
use hostgrid_runtime::{ContainerState, InMemoryRuntime};
use hostgrid_state::StateStore;
use serde_json::Value;
use tower::ServiceExt;

struct Fixture {
    tmp: tempfile::TempDir,
    runtime: Arc<InMemoryRuntime>,
    router: axum::Router,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let settings = OrchestratorSettings {
        tenant_root: tmp.path().join("users"),
        domain: "example.com".into(),
        scheme: "https".into(),
        companion_image: "filebrowser/filebrowser".into(),
        admin_password: "admin123".into(),
    };
    let orchestrator = Orchestrator::new(
        runtime.clone(),
        StateStore::open_in_memory().unwrap(),
        Arc::new(Catalog::default()),
        settings,
    );
    let router = build_router(ApiState {
        orchestrator: Arc::new(orchestrator),
        upload_dir: tmp.path().join("uploads"),
    });
    Fixture {
        tmp,
        runtime,
        router,
    }
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(body.into())
        .unwrap()
}

fn post_json(uri: &str, json: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_alice(router: &axum::Router) {
    let resp = router
        .clone()
        .oneshot(post_json(
            "/api/v1/tenants",
            serde_json::json!({"id": 1, "username": "alice"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn catalog_lists_service_types() {
    let f = fixture();
    let resp = f.router.oneshot(get("/api/v1/catalog")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let types = json["data"].as_array().unwrap();
    assert!(types.contains(&Value::from("Node.js")));
    assert_eq!(types.len(), 5);
}

#[tokio::test]
async fn tenant_registration_and_conflict() {
    let f = fixture();
    register_alice(&f.router).await;

    let resp = f.router.clone().oneshot(get("/api/v1/tenants/1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["username"], "alice");

    let resp = f
        .router
        .clone()
        .oneshot(post_json(
            "/api/v1/tenants",
            serde_json::json!({"id": 2, "username": "alice"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = f.router.oneshot(get("/api/v1/tenants/9")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["success"], false);
}

#[tokio::test]
async fn provision_with_archive_then_stop() {
    let f = fixture();
    register_alice(&f.router).await;

    let mut archive = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
        zip.start_file("index.html", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<h1>blog</h1>").unwrap();
        zip.finish().unwrap();
    }

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog?type=Static", archive))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["status"], "active");
    assert_eq!(json["data"]["urls"]["website"], "https://alice.example.com/blog");

    let index = f.tmp.path().join("users/alice/blog/data/index.html");
    assert_eq!(std::fs::read_to_string(index).unwrap(), "<h1>blog</h1>");
    let spooled = std::fs::read_dir(f.tmp.path().join("uploads")).unwrap().count();
    assert_eq!(spooled, 0);

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog/apagar", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["status"], "stopped");
    assert_eq!(f.runtime.state_of("alice-blog"), Some(ContainerState::Exited));

    let resp = f
        .router
        .oneshot(get("/api/v1/tenants/1/services/blog"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["data"]["status"], "stopped");
}

#[tokio::test]
async fn traversal_archive_is_a_client_error() {
    let f = fixture();
    register_alice(&f.router).await;

    let mut archive = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
        zip.start_file("../outside.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"escaped").unwrap();
        zip.finish().unwrap();
    }

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog?type=Static", archive))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(f.runtime.container_names().is_empty());

    let resp = f
        .router
        .oneshot(get("/api/v1/tenants/1/services"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["data"], serde_json::json!([]));
}

#[tokio::test]
async fn unsupported_type_and_invalid_action() {
    let f = fixture();
    register_alice(&f.router).await;

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog?type=Ruby", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog?type=PHP", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = f
        .router
        .clone()
        .oneshot(post("/api/v1/tenants/1/services/blog/explotar", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = f
        .router
        .oneshot(post("/api/v1/tenants/1/services/shop/encender", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_service_name_is_rejected_before_spooling() {
    let f = fixture();
    register_alice(&f.router).await;

    let resp = f
        .router
        .oneshot(post(
            "/api/v1/tenants/1/services/bad.name?type=Static",
            b"PK".to_vec(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!f.tmp.path().join("uploads").exists());
}
