use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: liveness plus which subsystems are wired.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "environment": app.settings.environment,
        "storage": app.builds.storage().kind(),
        "deploy_configured": app.deployer.is_some(),
    }))
}
