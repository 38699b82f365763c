use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use kitforge_core::ledger::{GeneratedBuild, StorageBackendKind};
use kitforge_core::BuildConfig;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Defaults to the company slug.
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub config: BuildConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub tenant: Option<String>,
}

fn summary(b: &GeneratedBuild) -> serde_json::Value {
    serde_json::json!({
        "id": b.id,
        "tenant_id": b.tenant_id,
        "products": b.products,
        "features": b.features,
        "archive_filename": b.archive_filename,
        "product_slug": b.product_slug,
        "storage": b.storage,
        "sha256": b.sha256,
        "size_bytes": b.size_bytes,
        "created_at": b.created_at,
        "updated_at": b.updated_at,
    })
}

/// POST /api/builds: generate, store and record a package.
pub async fn create_build(
    State(app): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let built = app.builds.create(req.tenant_id.as_deref(), req.config).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(built)?)))
}

/// GET /api/builds: newest first, optionally `?tenant=<id>`.
pub async fn list_builds(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let builds = app.builds.list(q.tenant).await?;
    let list: Vec<serde_json::Value> = builds.iter().map(summary).collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET /api/builds/:id: one build including its config snapshot.
pub async fn get_build(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let build = app.builds.get(&id).await?;
    let mut body = summary(&build);
    body["config"] = serde_json::to_value(&build.config)?;
    Ok(Json(body))
}

/// GET /api/builds/:id/download: redirect to object storage, or stream the
/// local archive.
pub async fn download_build(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (build, location) = app.builds.locate(&id).await?;
    let Some(location) = location else {
        return Err(AppError::not_found(format!("archive for build {id} is gone")));
    };
    match build.storage.backend {
        StorageBackendKind::Object => Ok(Redirect::temporary(&location).into_response()),
        StorageBackendKind::Local => {
            let bytes = app.builds.storage().fetch(&build.storage).await?;
            let disposition = format!("attachment; filename=\"{}\"", build.archive_filename);
            Ok((
                [
                    (header::CONTENT_TYPE, "application/zip".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from(bytes),
            )
                .into_response())
        }
    }
}

/// DELETE /api/builds/:id: discard the archive and forget the build.
pub async fn delete_build(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = app.builds.delete(&id).await?;
    Ok(Json(serde_json::json!({
        "deleted": removed.id,
        "tenant_id": removed.tenant_id,
    })))
}

/// POST /api/builds/:id/regenerate: rebuild from the recorded config.
pub async fn regenerate_build(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let built = app.builds.regenerate(&id).await?;
    Ok(Json(serde_json::to_value(built)?))
}
