use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use kitforge_core::ledger::BillingLink;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/tenants: every tenant with its current deployment status.
pub async fn list_tenants(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ledger = app.builds.ledger().clone();
    let result = tokio::task::spawn_blocking(move || {
        let tenants = ledger.list_tenants()?;
        let list: Vec<serde_json::Value> = tenants
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "company_name": t.company_name,
                    "status": t.status,
                    "latest_build_id": t.latest_build_id,
                    "urls": t.urls,
                    "updated_at": t.updated_at,
                })
            })
            .collect();
        Ok::<_, kitforge_core::ForgeError>(serde_json::json!(list))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/tenants/:id: full tenant record including deploy history.
pub async fn get_tenant(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ledger = app.builds.ledger().clone();
    let tenant = tokio::task::spawn_blocking(move || ledger.get_tenant(&id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(tenant)?))
}

/// POST /api/tenants/:id/billing: attach customer and subscription ids.
pub async fn set_billing(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(billing): Json<BillingLink>,
) -> Result<Json<serde_json::Value>, AppError> {
    if billing.customer_id.trim().is_empty() {
        return Err(AppError::bad_request("customer_id must not be empty"));
    }
    let ledger = app.builds.ledger().clone();
    let tenant = tokio::task::spawn_blocking(move || ledger.set_billing(&id, billing))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::json!({
        "id": tenant.id,
        "billing": tenant.billing,
    })))
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// POST /api/tenants/:id/deploy: start provisioning; answers before any
/// external call is made.
pub async fn deploy(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let ack = app.deployer()?.deploy(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::to_value(ack)?)))
}

/// POST /api/tenants/:id/redeploy: push the latest build to existing services.
pub async fn redeploy(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let ack = app.deployer()?.redeploy(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::to_value(ack)?)))
}

/// POST /api/tenants/:id/rollback: return every service to its previous
/// live deploy.
pub async fn rollback(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let ack = app.deployer()?.rollback(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::to_value(ack)?)))
}

/// POST /api/tenants/:id/deploy/cancel
pub async fn cancel(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ack = app.deployer()?.cancel(&id).await?;
    Ok(Json(serde_json::to_value(ack)?))
}

/// GET /api/tenants/:id/deploy/status: ledger state plus live health.
pub async fn deploy_status(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = app.deployer()?.check_status(&id).await?;
    Ok(Json(serde_json::to_value(status)?))
}
