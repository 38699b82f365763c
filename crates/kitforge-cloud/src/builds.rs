//! Generate, store and record builds.
//!
//! The generator is synchronous and filesystem-bound, so every pipeline run
//! and ledger write goes through `spawn_blocking`; storage calls stay async.

use crate::error::{BuildError, BuildResult};
use crate::storage::ArchiveStorage;
use chrono::Utc;
use kitforge_core::generate::{BuildReport, GeneratedPackage};
use kitforge_core::ledger::{GeneratedBuild, StorageHandle};
use kitforge_core::build_config::BuildContext;
use kitforge_core::{paths, BuildConfig, Generator, Ledger};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A build that has been generated, stored and recorded.
#[derive(Debug, Clone, Serialize)]
pub struct StoredBuild {
    pub build_id: String,
    pub tenant_id: String,
    pub archive_filename: String,
    pub product_slug: String,
    pub storage: StorageHandle,
    pub sha256: String,
    pub size_bytes: u64,
    /// Shown once; never persisted.
    pub default_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub report: BuildReport,
}

#[derive(Clone)]
pub struct BuildService {
    ledger: Arc<Ledger>,
    generator: Arc<Generator>,
    storage: Arc<dyn ArchiveStorage>,
}

impl BuildService {
    pub fn new(ledger: Arc<Ledger>, generator: Arc<Generator>, storage: Arc<dyn ArchiveStorage>) -> Self {
        Self {
            ledger,
            generator,
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn ArchiveStorage> {
        &self.storage
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Generate a package for `config` and record it under `tenant_id`
    /// (the company slug when absent).
    pub async fn create(&self, tenant_id: Option<&str>, config: BuildConfig) -> BuildResult<StoredBuild> {
        let tenant_id = match tenant_id {
            Some(t) => t.to_string(),
            None => config.company_slug(),
        };
        paths::validate_id(&tenant_id)?;

        let (package, config) = self.run_generator(config, BuildContext::new()).await?;
        let handle = self.storage.store(&package.archive_path).await?;

        let now = Utc::now();
        let build = GeneratedBuild {
            id: package.build_id.clone(),
            tenant_id: tenant_id.clone(),
            products: package.products.clone(),
            features: config.features.clone(),
            archive_filename: package.archive_filename.clone(),
            product_slug: package.product_slug.clone(),
            storage: handle.clone(),
            sha256: package.sha256.clone(),
            size_bytes: package.size_bytes,
            config,
            created_at: now,
            updated_at: now,
        };
        let recorded = self.blocking({
            let build = build.clone();
            move |ledger| ledger.record_build(&build)
        })
        .await;
        if let Err(e) = recorded {
            // An unrecorded archive is unreachable; do not leak it.
            if let Err(discard) = self.storage.discard(&handle).await {
                warn!(key = %handle.key, error = %discard, "could not discard unrecorded archive");
            }
            return Err(e);
        }
        info!(build_id = %build.id, tenant_id = %tenant_id, "build recorded");

        self.stored(build.id, tenant_id, package, handle).await
    }

    /// Re-run the pipeline from a build's recorded config and swap its
    /// archive. The build keeps its id, so the archive name and every
    /// `{{BUILD_ID}}` stay the same; secrets are fresh. A replaced archive
    /// under a different key is discarded.
    pub async fn regenerate(&self, build_id: &str) -> BuildResult<StoredBuild> {
        let existing = self.get(build_id).await?;
        let ctx = BuildContext::for_build(&existing.id);
        let (package, _) = self.run_generator(existing.config.clone(), ctx).await?;
        let handle = self.storage.store(&package.archive_path).await?;

        let previous = self
            .blocking({
                let (id, handle, sha) = (existing.id.clone(), handle.clone(), package.sha256.clone());
                let size = package.size_bytes;
                move |ledger| ledger.update_build_storage(&id, handle, &sha, size)
            })
            .await?;
        if previous != handle {
            if let Err(e) = self.storage.discard(&previous).await {
                warn!(build_id, key = %previous.key, error = %e, "could not discard replaced archive");
            }
        }
        info!(build_id, "build regenerated");

        self.stored(existing.id, existing.tenant_id, package, handle).await
    }

    pub async fn get(&self, build_id: &str) -> BuildResult<GeneratedBuild> {
        let id = build_id.to_string();
        self.blocking(move |ledger| ledger.get_build(&id)).await
    }

    pub async fn list(&self, tenant_id: Option<String>) -> BuildResult<Vec<GeneratedBuild>> {
        self.blocking(move |ledger| ledger.list_builds(tenant_id.as_deref()))
            .await
    }

    /// Where the archive can be downloaded from, `None` when it is gone.
    pub async fn locate(&self, build_id: &str) -> BuildResult<(GeneratedBuild, Option<String>)> {
        let build = self.get(build_id).await?;
        let location = self.storage.resolve(&build.storage).await?;
        Ok((build, location))
    }

    /// Discard the archive, then forget the build.
    pub async fn delete(&self, build_id: &str) -> BuildResult<GeneratedBuild> {
        let build = self.get(build_id).await?;
        self.storage.discard(&build.storage).await?;
        let id = build_id.to_string();
        let removed = self.blocking(move |ledger| ledger.delete_build(&id)).await?;
        info!(build_id, "build deleted");
        Ok(removed)
    }

    async fn run_generator(
        &self,
        config: BuildConfig,
        ctx: BuildContext,
    ) -> BuildResult<(GeneratedPackage, BuildConfig)> {
        let generator = self.generator.clone();
        tokio::task::spawn_blocking(move || {
            let package = generator.generate_with(&config, ctx)?;
            Ok::<_, BuildError>((package, config))
        })
        .await
        .map_err(|e| BuildError::Join(e.to_string()))?
    }

    async fn blocking<T, F>(&self, f: F) -> BuildResult<T>
    where
        F: FnOnce(&Ledger) -> kitforge_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        let result = tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| BuildError::Join(e.to_string()))?;
        Ok(result?)
    }

    async fn stored(
        &self,
        build_id: String,
        tenant_id: String,
        package: GeneratedPackage,
        handle: StorageHandle,
    ) -> BuildResult<StoredBuild> {
        let download_url = match self.storage.resolve(&handle).await {
            Ok(url) => url,
            Err(e) => {
                warn!(build_id = %build_id, error = %e, "could not resolve download location");
                None
            }
        };
        Ok(StoredBuild {
            build_id,
            tenant_id,
            archive_filename: package.archive_filename,
            product_slug: package.product_slug,
            storage: handle,
            sha256: package.sha256,
            size_bytes: package.size_bytes,
            default_password: package.default_password,
            download_url,
            report: package.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use kitforge_core::template::MemoryTemplateStore;
    use kitforge_core::{ForgeError, ProductId};
    use std::io::Read;
    use std::path::Path;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> BuildService {
        let store = MemoryTemplateStore::new()
            .with_text(ProductId::Site, "index.html", "<h1>{{COMPANY_NAME}}</h1>\n")
            .with_text(ProductId::Site, "src/data/settings.json", "{}\n")
            .with_text(ProductId::Site, "build.txt", "{{BUILD_ID}}\n");
        let generator = Generator::new(
            Arc::new(store),
            dir.path().join("work"),
            dir.path().join("archives"),
        );
        let ledger = Ledger::open(&dir.path().join("ledger.redb")).unwrap();
        BuildService::new(Arc::new(ledger), Arc::new(generator), Arc::new(LocalStorage::new()))
    }

    #[tokio::test]
    async fn create_records_build_and_tenant() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let built = svc
            .create(None, BuildConfig::new("Acme Roofing", vec![ProductId::Site]))
            .await
            .unwrap();

        assert_eq!(built.tenant_id, "acme-roofing");
        assert!(built.archive_filename.starts_with("acme-roofing-site-"));
        assert!(!built.default_password.is_empty());
        assert_eq!(built.download_url.as_deref(), Some(built.storage.key.as_str()));

        let tenant = svc.ledger().get_tenant("acme-roofing").unwrap();
        assert_eq!(tenant.latest_build_id.as_deref(), Some(built.build_id.as_str()));
        assert_eq!(svc.list(Some("acme-roofing".into())).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_tenant_id_is_rejected_before_generation() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc
            .create(Some("Bad Tenant"), BuildConfig::new("Acme", vec![ProductId::Site]))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Forge(ForgeError::InvalidConfig(_))));
        assert!(!dir.path().join("archives").exists());
    }

    fn archived_build_id(path: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let name = archive
            .file_names()
            .find(|n| n.ends_with("build.txt"))
            .unwrap()
            .to_string();
        let mut body = String::new();
        archive.by_name(&name).unwrap().read_to_string(&mut body).unwrap();
        body.trim().to_string()
    }

    #[tokio::test]
    async fn regenerate_keeps_build_id_inside_archive() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let first = svc
            .create(None, BuildConfig::new("Acme", vec![ProductId::Site]))
            .await
            .unwrap();
        assert_eq!(archived_build_id(&first.storage.key), first.build_id);

        let second = svc.regenerate(&first.build_id).await.unwrap();
        assert_eq!(second.build_id, first.build_id);
        assert_eq!(second.archive_filename, first.archive_filename);
        assert!(second.archive_filename.contains(&first.build_id[..8]));
        assert_ne!(second.default_password, first.default_password);
        assert!(Path::new(&second.storage.key).exists());
        assert_eq!(archived_build_id(&second.storage.key), first.build_id);

        let record = svc.get(&first.build_id).await.unwrap();
        assert_eq!(record.storage, second.storage);
        assert_eq!(record.sha256, second.sha256);
        assert_eq!(svc.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_discards_archive_and_record() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let built = svc
            .create(None, BuildConfig::new("Acme", vec![ProductId::Site]))
            .await
            .unwrap();

        svc.delete(&built.build_id).await.unwrap();
        assert!(!Path::new(&built.storage.key).exists());
        assert!(matches!(
            svc.get(&built.build_id).await,
            Err(BuildError::Forge(ForgeError::BuildNotFound(_)))
        ));
        let tenant = svc.ledger().get_tenant("acme").unwrap();
        assert_eq!(tenant.latest_build_id, None);
    }
}
