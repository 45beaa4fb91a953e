//! End-to-end tenant routing through the axum router over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::Path;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use cameyo_core::{MigrationSet, TenantId};
use cameyo_server::network::{NetworkConfig, NetworkModule};
use cameyo_server::storage::MemoryBackend;
use cameyo_server::tenant::{
    ProvisionPolicy, SchemaProvisioner, TenantClient, TenantClientRegistry, TenantConfig,
    TenantContext,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

async fn put_user(
    TenantClient(client): TenantClient<MemoryBackend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    match client.put("users", &id, body) {
        Ok(()) => StatusCode::CREATED,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn list_users(TenantClient(client): TenantClient<MemoryBackend>) -> Json<Value> {
    Json(json!(client.keys("users").unwrap_or_default()))
}

async fn whoami() -> String {
    tokio::task::yield_now().await;
    TenantContext::current().to_string()
}

struct TestApp {
    router: Router,
    registry: TenantClientRegistry<MemoryBackend>,
}

fn app(backend: &MemoryBackend, policy: ProvisionPolicy) -> TestApp {
    let provisioner = SchemaProvisioner::new(
        Arc::new(backend.clone()),
        policy,
        Arc::new(MigrationSet::marketplace()),
    );
    let registry = TenantClientRegistry::new(Arc::new(backend.clone()), Arc::new(provisioner));
    let tenant_config = TenantConfig {
        policy,
        ..TenantConfig::default()
    };
    let module = NetworkModule::new(NetworkConfig::default(), tenant_config, registry.clone())
        .unwrap()
        .with_api_routes(
            Router::new()
                .route("/users", get(list_users))
                .route("/users/{id}", put(put_user))
                .route("/whoami", get(whoami)),
        );
    TestApp {
        router: module.build_router(),
        registry,
    }
}

fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn header_wins_over_subdomain() {
    let backend = MemoryBackend::new()
        .with_schema(&tenant("acme"))
        .with_schema(&tenant("globex"));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request(
            "/api/tenant",
            &[("x-tenant-id", "globex"), ("host", "acme.localhost:3000")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tenant"], "globex");
    assert_eq!(body["source"], "header");
    assert_eq!(app.registry.tenants(), vec![tenant("globex")]);
}

#[tokio::test]
async fn subdomain_selects_tenant() {
    let backend = MemoryBackend::new().with_schema(&tenant("acme"));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request("/api/tenant", &[("host", "acme.localhost:3000")]))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["tenant"], "acme");
    assert_eq!(body["source"], "subdomain");
}

#[tokio::test]
async fn no_header_and_no_subdomain_is_public() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request("/api/tenant", &[("host", "localhost:3000")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tenant"], "public");
    assert_eq!(body["source"], "default");
}

#[tokio::test]
async fn invalid_tenant_is_rejected_before_any_storage_work() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::AutoProvision);

    for bad in ["acme;DROP SCHEMA public", "../etc", "acme.corp", "tenant name"] {
        let response = app
            .router
            .clone()
            .oneshot(get_request("/api/tenant", &[("x-tenant-id", bad)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{bad}");
        let body = body_json(response).await;
        assert_eq!(body["error"], "InvalidTenantId");
    }

    assert!(app.registry.is_empty());
    assert_eq!(backend.connect_count(), 0);
    assert_eq!(backend.migrations_applied(), 0);
}

#[tokio::test]
async fn unprovisioned_schema_fails_closed() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request("/api/tenant", &[("x-tenant-id", "initech")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "SchemaNotProvisioned");
    assert_eq!(body["tenant"], "initech");
    assert!(app.registry.is_empty());
    assert!(!backend.has_schema(&tenant("initech")));
}

#[tokio::test]
async fn first_request_provisions_and_next_reuses_client() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::AutoProvision);

    let first = app
        .router
        .clone()
        .oneshot(get_request("/api/tenant", &[("x-tenant-id", "acme-1")]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(backend.has_schema(&tenant("acme-1")));
    assert_eq!(backend.connect_count(), 1);
    let migrations = backend.migrations_applied();

    let second = app
        .router
        .oneshot(get_request("/api/tenant", &[("x-tenant-id", "acme-1")]))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(backend.connect_count(), 1);
    assert_eq!(backend.migrations_applied(), migrations);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_requests_open_one_connection() {
    let backend = MemoryBackend::new().with_schema(&tenant("globex"));
    backend.set_latency(Duration::from_millis(25));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move {
                router
                    .oneshot(get_request("/api/tenant", &[("x-tenant-id", "globex")]))
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(backend.connect_count(), 1);
    assert_eq!(app.registry.len(), 1);
    assert_eq!(app.registry.pending_len(), 0);
}

#[tokio::test]
async fn connection_failure_does_not_poison_later_requests() {
    let backend = MemoryBackend::new().with_schema(&tenant("acme"));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    backend.set_fail_connect(true);
    let failed = app
        .router
        .clone()
        .oneshot(get_request("/api/tenant", &[("x-tenant-id", "acme")]))
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(failed).await["error"], "ConnectionFailure");

    backend.set_fail_connect(false);
    let recovered = app
        .router
        .oneshot(get_request("/api/tenant", &[("x-tenant-id", "acme")]))
        .await
        .unwrap();
    assert_eq!(recovered.status(), StatusCode::OK);
    assert_eq!(backend.connect_count(), 1);
}

#[tokio::test]
async fn tenant_data_is_isolated() {
    let backend = MemoryBackend::new()
        .with_schema(&tenant("acme"))
        .with_schema(&tenant("globex"));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let created = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/users/u1")
                .header("x-tenant-id", "acme")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"email":"user@acme.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let acme = app
        .router
        .clone()
        .oneshot(get_request("/api/users", &[("x-tenant-id", "acme")]))
        .await
        .unwrap();
    assert_eq!(body_json(acme).await, json!(["u1"]));

    let globex = app
        .router
        .oneshot(get_request("/api/users", &[("host", "globex.example.com")]))
        .await
        .unwrap();
    assert_eq!(body_json(globex).await, json!([]));
}

#[tokio::test]
async fn handlers_run_inside_tenant_context() {
    let backend = MemoryBackend::new().with_schema(&tenant("acme"));
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request("/api/whoami", &[("x-tenant-id", "ACME")]))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "acme");
}

#[tokio::test]
async fn health_routes_skip_tenant_resolution() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::FailClosed);

    let response = app
        .router
        .oneshot(get_request("/health", &[("x-tenant-id", "not valid!")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["tenants"], 0);
    assert_eq!(backend.connect_count(), 0);
}

#[tokio::test]
async fn closed_registry_returns_503() {
    let backend = MemoryBackend::new();
    let app = app(&backend, ProvisionPolicy::FailClosed);
    app.registry.shutdown().await;

    let response = app
        .router
        .oneshot(get_request("/api/tenant", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
