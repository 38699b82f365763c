pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use kitforge_core::config::Settings;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Builds
        .route("/api/builds", get(routes::builds::list_builds))
        .route("/api/builds", post(routes::builds::create_build))
        .route("/api/builds/{id}", get(routes::builds::get_build))
        .route("/api/builds/{id}", delete(routes::builds::delete_build))
        .route(
            "/api/builds/{id}/download",
            get(routes::builds::download_build),
        )
        .route(
            "/api/builds/{id}/regenerate",
            post(routes::builds::regenerate_build),
        )
        // Tenants
        .route("/api/tenants", get(routes::tenants::list_tenants))
        .route("/api/tenants/{id}", get(routes::tenants::get_tenant))
        .route(
            "/api/tenants/{id}/billing",
            post(routes::tenants::set_billing),
        )
        // Deployment
        .route("/api/tenants/{id}/deploy", post(routes::tenants::deploy))
        .route(
            "/api/tenants/{id}/deploy/status",
            get(routes::tenants::deploy_status),
        )
        .route(
            "/api/tenants/{id}/deploy/cancel",
            post(routes::tenants::cancel),
        )
        .route("/api/tenants/{id}/redeploy", post(routes::tenants::redeploy))
        .route("/api/tenants/{id}/rollback", post(routes::tenants::rollback))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the API server on the address in `settings.server.bind`.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    let app_state = state::AppState::from_settings(settings).await?;
    serve_on(listener, app_state).await
}

/// Start the API server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when binding port
/// 0 and letting the OS pick).
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: state::AppState,
) -> anyhow::Result<()> {
    if let Some(deployer) = &app_state.deployer {
        let max_age = Duration::from_secs(app_state.settings.stuck_deploy_secs);
        let recovered = deployer.recover_stuck(max_age).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "failed deployments left over from a previous run");
        }
    }

    let addr = listener.local_addr()?;
    tracing::info!("kitforge API listening on http://{addr}");

    axum::serve(listener, build_router(app_state)).await?;
    Ok(())
}
