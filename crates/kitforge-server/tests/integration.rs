use async_trait::async_trait;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use kitforge_cloud::ports::{
    CloudPlatform, DatabaseSpec, DeployRecord, EnvVar, ProvisionedService, RepoFile, ServiceHealth,
    ServiceSpec, SourceControl,
};
use kitforge_cloud::{ArchiveStorage, BuildService, DeployOptions, DeployResult, Deployer, LocalStorage};
use kitforge_core::config::Settings;
use kitforge_core::ledger::RepositoryRef;
use kitforge_core::template::MemoryTemplateStore;
use kitforge_core::{Generator, Ledger, ProductId};
use kitforge_server::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct StubScm;

#[async_trait]
impl SourceControl for StubScm {
    async fn create_repository(&self, name: &str, _description: &str) -> DeployResult<RepositoryRef> {
        Ok(RepositoryRef {
            owner: "builds".into(),
            name: name.into(),
            url: format!("https://github.com/builds/{name}"),
        })
    }

    async fn push_files(&self, _repo: &RepositoryRef, _files: &[RepoFile], _message: &str) -> DeployResult<String> {
        Ok("abc123".into())
    }
}

struct StubPlatform;

#[async_trait]
impl CloudPlatform for StubPlatform {
    async fn create_database(&self, _spec: &DatabaseSpec) -> DeployResult<String> {
        Ok("dpg-1".into())
    }

    async fn database_connection(&self, _id: &str) -> DeployResult<String> {
        Ok("postgres://internal/db".into())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> DeployResult<ProvisionedService> {
        Ok(ProvisionedService {
            id: format!("srv-{}", spec.name),
            url: Some(format!("https://{}.onrender.com", spec.name)),
        })
    }

    async fn set_env_vars(&self, _id: &str, _vars: &[EnvVar]) -> DeployResult<()> {
        Ok(())
    }

    async fn service_health(&self, _id: &str) -> DeployResult<ServiceHealth> {
        Ok(ServiceHealth::Live)
    }

    async fn trigger_deploy(&self, _id: &str) -> DeployResult<String> {
        Ok("dep-2".into())
    }

    async fn list_deploys(&self, _id: &str, _limit: u32) -> DeployResult<Vec<DeployRecord>> {
        Ok(vec![
            DeployRecord { id: "dep-2".into(), status: "live".into() },
            DeployRecord { id: "dep-1".into(), status: "deactivated".into() },
        ])
    }

    async fn rollback(&self, _id: &str, _deploy_id: &str) -> DeployResult<String> {
        Ok("dep-3".into())
    }
}

/// State over a temp directory with in-memory templates and local storage.
/// `with_deployer` wires stub GitHub and Render adapters.
fn test_state(dir: &TempDir, with_deployer: bool) -> AppState {
    let store = MemoryTemplateStore::new()
        .with_text(ProductId::Site, "index.html", "<h1>{{COMPANY_NAME}}</h1>\n")
        .with_text(ProductId::Site, "src/data/settings.json", "{}\n")
        .with_text(ProductId::Site, "package.json", "{\"name\":\"{{COMPANY_SLUG}}\"}\n");
    let generator = Arc::new(Generator::new(
        Arc::new(store),
        dir.path().join("work"),
        dir.path().join("archives"),
    ));
    let ledger = Arc::new(Ledger::open(&dir.path().join("ledger.redb")).unwrap());
    let storage: Arc<dyn ArchiveStorage> = Arc::new(LocalStorage::new());

    let deployer = with_deployer.then(|| {
        Deployer::new(
            ledger.clone(),
            storage.clone(),
            Arc::new(StubScm),
            Arc::new(StubPlatform),
            DeployOptions {
                health_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(10),
            },
        )
    });

    let settings = Settings {
        data_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    AppState::new(settings, BuildService::new(ledger, generator, storage), deployer)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a request with no body and the given method.
async fn send(app: axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn site_request(company: &str) -> serde_json::Value {
    serde_json::json!({
        "config": {
            "products": ["site"],
            "company": { "name": company },
            "branding": { "primary_color": "#0f766e" }
        }
    })
}

/// Generate a site build and return its id.
async fn create_build(app: &axum::Router, company: &str) -> String {
    let (status, body) = post_json(app.clone(), "/api/builds", site_request(company)).await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    body["build_id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_wiring() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let (status, body) = get(app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "local");
    assert_eq!(body["deploy_configured"], false);
}

#[tokio::test]
async fn create_build_returns_summary_and_password() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));

    let (status, body) = post_json(app, "/api/builds", site_request("Acme Roofing")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tenant_id"], "acme-roofing");
    assert_eq!(body["product_slug"], "site");
    assert!(body["archive_filename"]
        .as_str()
        .unwrap()
        .starts_with("acme-roofing-site-"));
    assert!(!body["default_password"].as_str().unwrap().is_empty());
    assert_eq!(body["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn create_build_with_explicit_tenant() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));

    let mut req = site_request("Acme Roofing");
    req["tenant_id"] = serde_json::json!("acme-west");
    let (status, body) = post_json(app.clone(), "/api/builds", req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tenant_id"], "acme-west");

    let (status, tenant) = get(app, "/api/tenants/acme-west").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tenant["company_name"], "Acme Roofing");
    assert_eq!(tenant["status"], "generated");
}

#[tokio::test]
async fn invalid_config_is_rejected_with_400() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));

    let body = serde_json::json!({
        "config": {
            "products": ["site"],
            "company": { "name": "Acme" },
            "branding": { "primary_color": "not-a-color" }
        }
    });
    let (status, json) = post_json(app, "/api/builds", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["retry_safe"], false);
}

#[tokio::test]
async fn features_without_manifest_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));

    let body = serde_json::json!({
        "config": {
            "products": ["site"],
            "company": { "name": "Acme" },
            "features": { "site": ["gallery"] }
        }
    });
    let (status, json) = post_json(app, "/api/builds", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["report"]["skipped_resolvers"], serde_json::json!(["site"]));
    assert_eq!(json["report"]["warnings"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_product_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));

    let body = serde_json::json!({
        "config": {
            "products": ["blog"],
            "company": { "name": "Acme" }
        }
    });
    let (status, _) = post_json(app, "/api/builds", body).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn list_and_get_builds() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let first = create_build(&app, "Acme").await;
    create_build(&app, "Globex").await;

    let (status, all) = get(app.clone(), "/api/builds").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, acme) = get(app.clone(), "/api/builds?tenant=acme").await;
    let acme = acme.as_array().unwrap();
    assert_eq!(acme.len(), 1);
    assert_eq!(acme[0]["id"], first.as_str());

    let (status, detail) = get(app, &format!("/api/builds/{first}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["config"]["company"]["name"], "Acme");
}

#[tokio::test]
async fn missing_build_is_404() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let (status, body) = get(app, "/api/builds/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn download_streams_local_archive() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let id = create_build(&app, "Acme").await;

    let req = axum::http::Request::builder()
        .uri(format!("/api/builds/{id}/download"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/zip"
    );
    let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"acme-site-"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // Local file header signature.
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn regenerate_keeps_id_and_replaces_archive() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let id = create_build(&app, "Acme").await;
    let (_, before) = get(app.clone(), &format!("/api/builds/{id}")).await;

    let (status, after) = send(app.clone(), "POST", &format!("/api/builds/{id}/regenerate")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["build_id"], id.as_str());
    assert_eq!(after["archive_filename"], before["archive_filename"]);
    assert_eq!(after["storage"]["key"], before["storage"]["key"]);
    assert!(std::path::Path::new(after["storage"]["key"].as_str().unwrap()).exists());

    let (_, listed) = get(app, "/api/builds").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_build_and_archive() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    let id = create_build(&app, "Acme").await;
    let (_, detail) = get(app.clone(), &format!("/api/builds/{id}")).await;

    let (status, body) = send(app.clone(), "DELETE", &format!("/api/builds/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], id.as_str());
    assert!(!std::path::Path::new(detail["storage"]["key"].as_str().unwrap()).exists());

    let (status, _) = get(app, &format!("/api/builds/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn billing_link_is_stored() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    create_build(&app, "Acme").await;

    let (status, body) = post_json(
        app.clone(),
        "/api/tenants/acme/billing",
        serde_json::json!({ "customer_id": "cus_123", "subscription_id": "sub_9" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["billing"]["customer_id"], "cus_123");

    let (status, _) = post_json(
        app,
        "/api/tenants/acme/billing",
        serde_json::json!({ "customer_id": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenants_are_listed() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    create_build(&app, "Globex").await;
    create_build(&app, "Acme").await;

    let (status, body) = get(app.clone(), "/api/tenants").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["acme", "globex"]);

    let (status, _) = get(app, "/api/tenants/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_without_credentials_is_503() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, false));
    create_build(&app, "Acme").await;

    let (status, body) = send(app, "POST", "/api/tenants/acme/deploy").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn deploy_is_accepted_and_goes_live() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, true));
    create_build(&app, "Acme").await;

    let (status, ack) = send(app.clone(), "POST", "/api/tenants/acme/deploy").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["status"], "deploying");
    assert_eq!(ack["action"], "deploy");
    assert!(!ack["job_id"].as_str().unwrap().is_empty());

    let mut last = serde_json::Value::Null;
    for _ in 0..200 {
        let (status, body) = get(app.clone(), "/api/tenants/acme/deploy/status").await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "live" {
            last = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], "live", "deploy never went live");
    assert_eq!(last["tenant_status"], "deployed");
    assert!(last["urls"]["site"].as_str().unwrap().starts_with("https://"));

    let (status, body) = send(app, "POST", "/api/tenants/acme/deploy").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("redeploy"));
}

#[tokio::test]
async fn deploy_for_unknown_tenant_is_404() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, true));
    let (status, _) = send(app, "POST", "/api/tenants/nobody/deploy").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn redeploy_before_first_deploy_is_409() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, true));
    create_build(&app, "Acme").await;

    let (status, _) = send(app.clone(), "POST", "/api/tenants/acme/redeploy").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(app, "POST", "/api/tenants/acme/rollback").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_of_undeployed_tenant() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, true));
    create_build(&app, "Acme").await;

    let (status, body) = get(app, "/api/tenants/acme/deploy/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_deployed");
    assert_eq!(body["services"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cancel_without_running_deploy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = kitforge_server::build_router(test_state(&dir, true));
    create_build(&app, "Acme").await;

    let (status, _) = send(app, "POST", "/api/tenants/acme/deploy/cancel").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
