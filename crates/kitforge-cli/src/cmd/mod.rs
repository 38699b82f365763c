pub mod builds;
pub mod config;
pub mod deploy;
pub mod generate;
pub mod manifest;
pub mod serve;
pub mod tenant;

use anyhow::Context;
use kitforge_cloud::Deployer;
use kitforge_core::config::Settings;
use kitforge_server::state::AppState;
use std::future::Future;
use std::path::Path;

pub fn load_settings(root: &Path) -> anyhow::Result<Settings> {
    Settings::load(root).context("failed to load kitforge.yaml")
}

/// Run `fut` to completion on a fresh multi-threaded runtime.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(fut))
}

/// Open the ledger, templates, storage and (when configured) the deployer
/// the same way the API server does.
pub async fn open_state(root: &Path) -> anyhow::Result<AppState> {
    let settings = load_settings(root)?;
    AppState::from_settings(settings).await
}

pub fn require_deployer(state: &AppState) -> anyhow::Result<&Deployer> {
    state.deployer.as_ref().ok_or_else(|| {
        anyhow::anyhow!(
            "deployment is not configured; set GITHUB_TOKEN, GITHUB_OWNER, RENDER_API_KEY and RENDER_OWNER_ID"
        )
    })
}
