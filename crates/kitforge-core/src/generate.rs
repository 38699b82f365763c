//! The generation pipeline: render → strip → inject → assemble → archive.

use crate::assemble;
use crate::build_config::{BuildConfig, BuildContext};
use crate::error::Result;
use crate::inject;
use crate::manifest::FeatureManifest;
use crate::product::{self, ProductId};
use crate::resolver;
use crate::template::TemplateStore;
use crate::tokens;
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What the pipeline did besides producing the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    /// `<product>/<path>` → tokens left in place.
    pub unresolved_tokens: BTreeMap<String, Vec<String>>,
    /// Products built without a feature manifest, so nothing was stripped.
    pub skipped_resolvers: Vec<ProductId>,
    /// Files removed or emptied by feature resolution, `<product>/<path>`.
    pub removed_files: Vec<String>,
    pub injected_assets: Vec<String>,
    pub template_versions: BTreeMap<ProductId, String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPackage {
    pub build_id: String,
    pub products: Vec<ProductId>,
    pub archive_path: PathBuf,
    pub archive_filename: String,
    pub product_slug: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub default_password: String,
    pub report: BuildReport,
}

/// `<company-slug>-<product-slug>-<short build id>.zip`
pub fn archive_filename(config: &BuildConfig, ctx: &BuildContext) -> String {
    format!(
        "{}-{}-{}.zip",
        config.company_slug(),
        product::product_slug(&config.products),
        ctx.short_id()
    )
}

pub struct Generator {
    templates: Arc<dyn TemplateStore>,
    work_root: PathBuf,
    output_dir: PathBuf,
}

impl Generator {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        work_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            templates,
            work_root: work_root.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn templates(&self) -> &Arc<dyn TemplateStore> {
        &self.templates
    }

    /// Generate with a fresh build id and fresh secrets.
    pub fn generate(&self, config: &BuildConfig) -> Result<GeneratedPackage> {
        self.generate_with(config, BuildContext::new())
    }

    /// Generate with a caller-supplied context. Identical config and context
    /// produce a byte-identical archive.
    pub fn generate_with(&self, config: &BuildConfig, ctx: BuildContext) -> Result<GeneratedPackage> {
        config.validate()?;
        let products = config.products();

        // Manifest and feature validation happen before any directory exists.
        let mut manifests: BTreeMap<ProductId, Option<Arc<FeatureManifest>>> = BTreeMap::new();
        for &p in &products {
            let manifest = self.templates.manifest(p)?;
            if let Some(m) = &manifest {
                m.check_features(p, config.enabled_features(p))?;
            }
            manifests.insert(p, manifest);
        }

        let ws = Workspace::create(&self.work_root, &ctx.build_id)?;
        let token_map = config.token_map(&ctx);
        let mut report = BuildReport::default();

        for &p in &products {
            let files = self.templates.files(p)?;
            let dir = ws.product_dir(p);
            let rendered = tokens::render(&files, &dir, &token_map)?;
            for (path, names) in rendered.unresolved {
                report
                    .unresolved_tokens
                    .insert(format!("{p}/{}", path.display()), names);
            }
            if let Some(v) = self.templates.version(p) {
                report.template_versions.insert(p, v);
            }

            match manifests.get(&p).and_then(Option::as_ref) {
                Some(manifest) => {
                    let stripped = resolver::strip(p, &dir, manifest, config.enabled_features(p))?;
                    report.removed_files.extend(
                        stripped
                            .removed_backend
                            .iter()
                            .chain(&stripped.removed_views)
                            .chain(&stripped.neutralized_data)
                            .map(|f| format!("{p}/{f}")),
                    );
                }
                None => {
                    warn!(build_id = %ctx.build_id, product = %p, "no feature manifest, skipping feature resolution");
                    report.skipped_resolvers.push(p);
                    if !config.enabled_features(p).is_empty() {
                        report.warnings.push(format!(
                            "{p} has no feature manifest; feature selection was ignored"
                        ));
                    }
                }
            }

            let injected = inject::inject(p, &dir, config)?;
            report
                .injected_assets
                .extend(injected.assets.iter().map(|a| format!("{p}/{}", a.display())));
        }

        assemble::assemble(ws.path(), config, &ctx)?;

        let filename = archive_filename(config, &ctx);
        let summary = assemble::archive(ws.path(), &self.output_dir.join(&filename))?;
        if let Err(e) = ws.close() {
            warn!(build_id = %ctx.build_id, error = %e, "workspace cleanup failed after archiving");
        }

        info!(
            build_id = %ctx.build_id,
            archive = %filename,
            size_bytes = summary.size_bytes,
            "build generated"
        );
        Ok(GeneratedPackage {
            product_slug: product::product_slug(&products),
            products,
            archive_path: summary.path,
            archive_filename: filename,
            sha256: summary.sha256,
            size_bytes: summary.size_bytes,
            default_password: ctx.secrets.default_password,
            build_id: ctx.build_id,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_config::BuildSecrets;
    use crate::error::ForgeError;
    use crate::template::MemoryTemplateStore;
    use chrono::{DateTime, Utc};
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;

    const CRM_MANIFEST: &str = r#"
composition_root:
  path: backend/server.js
core:
  routes: [customers.js]
  services: [customerService.js]
features:
  invoices:
    routes: [invoices.js]
    services: [invoiceService.js]
modules:
  - { file: customers.js, symbol: customersRouter, mount: /api/customers }
  - { file: invoices.js, symbol: invoicesRouter, mount: /api/invoices }
"#;

    const SERVER_JS: &str = "// factory:imports:start\n// factory:imports:end\n\
const app = require('express')();\n\
// factory:mounts:start\n// factory:mounts:end\n";

    fn ctx(id: &str) -> BuildContext {
        BuildContext {
            build_id: id.into(),
            secrets: BuildSecrets {
                default_password: "pw-fixed".into(),
                jwt_secret: "jwt".into(),
                session_secret: "sess".into(),
            },
            generated_at: DateTime::parse_from_rfc3339("2026-02-02T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn store() -> MemoryTemplateStore {
        let manifest = FeatureManifest::parse(ProductId::Crm, CRM_MANIFEST).unwrap();
        MemoryTemplateStore::new()
            .with_text(ProductId::Site, "index.html", "<h1>{{COMPANY_NAME}}</h1>")
            .with_text(ProductId::Site, "src/styles.css", ":root { --primary: #2563eb; }")
            .with_text(ProductId::Admin, "index.html", "<h1>{{COMPANY_NAME}} admin</h1>")
            .with_text(ProductId::Crm, "backend/server.js", SERVER_JS)
            .with_text(ProductId::Crm, "backend/.env", "JWT_SECRET={{JWT_SECRET}}\nFAX={{FAX}}\n")
            .with_text(ProductId::Crm, "backend/routes/auth.js", "")
            .with_text(ProductId::Crm, "backend/routes/packages.js", "")
            .with_text(ProductId::Crm, "backend/routes/customers.js", "")
            .with_text(ProductId::Crm, "backend/routes/invoices.js", "")
            .with_text(ProductId::Crm, "backend/services/customerService.js", "")
            .with_text(ProductId::Crm, "backend/services/invoiceService.js", "")
            .with_manifest(ProductId::Crm, manifest)
    }

    fn generator(root: &Path) -> Generator {
        Generator::new(Arc::new(store()), root.join("work"), root.join("out"))
    }

    fn entries(path: &Path) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .filter(|n| !n.ends_with('/'))
            .collect()
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut out = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn crm_with_no_features_ships_core_and_allowlist_only() {
        let dir = TempDir::new().unwrap();
        let cfg = BuildConfig::new("Acme Roofing", vec![ProductId::Crm]);
        let pkg = generator(dir.path()).generate_with(&cfg, ctx("11111111-aaaa")).unwrap();

        assert_eq!(pkg.archive_filename, "acme-roofing-crm-11111111.zip");
        let names = entries(&pkg.archive_path);
        assert!(names.contains(&"crm/backend/routes/customers.js".to_string()));
        assert!(names.contains(&"crm/backend/routes/auth.js".to_string()));
        assert!(names.contains(&"crm/backend/routes/packages.js".to_string()));
        assert!(!names.iter().any(|n| n.contains("invoice")));
        assert!(names.contains(&"SETUP.md".to_string()));
        assert!(names.contains(&"setup.sh".to_string()));

        let server = read_entry(&pkg.archive_path, "crm/backend/server.js");
        assert!(server.contains("customersRouter"));
        assert!(!server.contains("invoicesRouter"));
        assert_eq!(pkg.default_password, "pw-fixed");
    }

    #[test]
    fn unresolved_tokens_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = BuildConfig::new("Acme", vec![ProductId::Crm]);
        let pkg = generator(dir.path()).generate_with(&cfg, ctx("22222222")).unwrap();
        assert_eq!(
            pkg.report.unresolved_tokens.get("crm/backend/.env"),
            Some(&vec!["FAX".to_string()])
        );
        let env = read_entry(&pkg.archive_path, "crm/backend/.env");
        assert!(env.starts_with("JWT_SECRET=jwt\n"));
    }

    #[test]
    fn site_and_admin_nest_admin_under_site() {
        let dir = TempDir::new().unwrap();
        let cfg = BuildConfig::new("Acme", vec![ProductId::Admin, ProductId::Site]);
        let pkg = generator(dir.path()).generate_with(&cfg, ctx("33333333")).unwrap();
        assert_eq!(pkg.product_slug, "site-admin");
        let names = entries(&pkg.archive_path);
        assert!(names.contains(&"site/admin/index.html".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("admin/")));
        assert_eq!(pkg.report.skipped_resolvers, vec![ProductId::Site, ProductId::Admin]);
    }

    #[test]
    fn admin_alone_sits_at_archive_root() {
        let dir = TempDir::new().unwrap();
        let cfg = BuildConfig::new("Acme", vec![ProductId::Admin]);
        let pkg = generator(dir.path()).generate_with(&cfg, ctx("44444444")).unwrap();
        assert!(entries(&pkg.archive_path).contains(&"admin/index.html".to_string()));
    }

    #[test]
    fn identical_input_gives_identical_archive() {
        let dir = TempDir::new().unwrap();
        let gen = generator(dir.path());
        let mut cfg = BuildConfig::new("Acme", vec![ProductId::Site, ProductId::Crm]);
        cfg.branding.primary_color = Some("#0f766e".into());
        cfg.features.insert(ProductId::Crm, vec!["invoices".into()]);
        let a = gen.generate_with(&cfg, ctx("55555555")).unwrap();
        let first = std::fs::read(&a.archive_path).unwrap();
        let b = gen.generate_with(&cfg, ctx("55555555")).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(first, std::fs::read(&b.archive_path).unwrap());
        assert!(read_entry(&b.archive_path, "site/src/styles.css").contains("#0f766e"));
    }

    #[test]
    fn unknown_feature_fails_before_workspace_exists() {
        let dir = TempDir::new().unwrap();
        let mut cfg = BuildConfig::new("Acme", vec![ProductId::Crm]);
        cfg.features.insert(ProductId::Crm, vec!["teleport".into()]);
        let err = generator(dir.path()).generate_with(&cfg, ctx("66666666")).unwrap_err();
        assert!(matches!(err, ForgeError::UnknownFeature { .. }));
        assert!(!dir.path().join("work/66666666").exists());
    }

    #[test]
    fn missing_template_cleans_up_workspace() {
        let dir = TempDir::new().unwrap();
        let gen = Generator::new(
            Arc::new(MemoryTemplateStore::new().with_text(ProductId::Site, "a.txt", "a")),
            dir.path().join("work"),
            dir.path().join("out"),
        );
        let cfg = BuildConfig::new("Acme", vec![ProductId::Site, ProductId::Crm]);
        let err = gen.generate_with(&cfg, ctx("77777777")).unwrap_err();
        assert!(matches!(err, ForgeError::TemplateMissing { .. }));
        assert!(err.retry_safe());
        assert!(!dir.path().join("work/77777777").exists());
        assert!(!dir.path().join("out").join("acme-site-crm-77777777.zip").exists());
    }

    #[test]
    fn invalid_config_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let cfg = BuildConfig::new("", vec![ProductId::Site]);
        let err = generator(dir.path()).generate(&cfg).unwrap_err();
        assert!(!err.retry_safe());
        assert!(!dir.path().join("work").exists());
    }
}
