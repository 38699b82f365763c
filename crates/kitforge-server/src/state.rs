use kitforge_cloud::{create_storage, ArchiveStorage, BuildService, Deployer};
use kitforge_core::config::Settings;
use kitforge_core::template::FsTemplateStore;
use kitforge_core::{Generator, Ledger};
use std::sync::Arc;
use tracing::warn;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub builds: BuildService,
    /// `None` when GitHub or Render credentials are missing.
    pub deployer: Option<Deployer>,
}

impl AppState {
    pub fn new(settings: Settings, builds: BuildService, deployer: Option<Deployer>) -> Self {
        Self {
            settings: Arc::new(settings),
            builds,
            deployer,
        }
    }

    /// Open the ledger, template store, storage backend and (when
    /// configured) the deployer described by `settings`.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let ledger = Arc::new(Ledger::open(&settings.ledger_path())?);
        let templates = Arc::new(FsTemplateStore::new(settings.templates_dir.clone()));
        let generator = Arc::new(Generator::new(
            templates,
            settings.work_root(),
            settings.archives_dir(),
        ));
        let storage: Arc<dyn ArchiveStorage> =
            create_storage(&settings.storage, settings.environment).await?;

        let deployer = if settings.deploy_configured() {
            Some(Deployer::from_settings(&settings, ledger.clone(), storage.clone())?)
        } else {
            warn!("deployment credentials missing; deploy endpoints will answer 503");
            None
        };

        let builds = BuildService::new(ledger, generator, storage);
        Ok(Self::new(settings, builds, deployer))
    }

    pub fn deployer(&self) -> Result<&Deployer, crate::error::AppError> {
        self.deployer.as_ref().ok_or_else(|| {
            crate::error::AppError::unavailable(
                "deployment is not configured (GITHUB_TOKEN, GITHUB_OWNER, RENDER_API_KEY, RENDER_OWNER_ID)",
            )
        })
    }
}
