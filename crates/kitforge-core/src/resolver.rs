//! Feature-driven tree shaking of a rendered product workspace.
//!
//! Backend route and service files outside the retained set are deleted, the
//! composition root's registration blocks are regenerated from the manifest's
//! module list, disabled frontend views are deleted and their data files are
//! emptied in place.

use crate::error::{ForgeError, Result};
use crate::io;
use crate::manifest::{
    FeatureManifest, IMPORTS_END, IMPORTS_START, MOUNTS_END, MOUNTS_START,
};
use crate::product::ProductId;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StripReport {
    /// Backend files removed, relative to the product root.
    pub removed_backend: Vec<String>,
    pub removed_views: Vec<String>,
    pub neutralized_data: Vec<String>,
    /// Route files registered in the regenerated composition root.
    pub registered_modules: Vec<String>,
    pub hidden_nav: Vec<String>,
}

/// Strip `product_dir` down to the files required by `enabled`.
pub fn strip(
    product: ProductId,
    product_dir: &Path,
    manifest: &FeatureManifest,
    enabled: &[String],
) -> Result<StripReport> {
    manifest.check_features(product, enabled)?;
    let retained = manifest.retained(enabled);
    let mut report = StripReport::default();

    for (dir, keep) in [
        (&manifest.routes_dir, &retained.routes),
        (&manifest.services_dir, &retained.services),
    ] {
        for rel in prune_dir(&product_dir.join(dir), keep, manifest)? {
            report.removed_backend.push(format!("{dir}/{rel}"));
        }
    }

    report.registered_modules = regenerate_composition_root(product, product_dir, manifest)?;

    let frontend_keep = frontend_in_use(manifest, enabled);
    let mut hidden = BTreeSet::new();
    for (id, files) in manifest.disabled(enabled) {
        for view in &files.views {
            if frontend_keep.contains(view.as_str()) {
                continue;
            }
            if io::remove_file_if_exists(&product_dir.join(view))? {
                report.removed_views.push(view.clone());
            }
        }
        for data in &files.data {
            if frontend_keep.contains(data.as_str()) {
                continue;
            }
            neutralize(&product_dir.join(data))?;
            report.neutralized_data.push(data.clone());
        }
        hidden.extend(files.nav.iter().cloned());
        debug!(product = %product, feature = id, "feature disabled");
    }

    if let Some(nav) = &manifest.navigation {
        report.hidden_nav = hide_navigation(&product_dir.join(nav), &hidden)?;
    }

    info!(
        product = %product,
        removed = report.removed_backend.len(),
        views = report.removed_views.len(),
        "feature resolution complete"
    );
    Ok(report)
}

/// Delete every file under `dir` whose relative path is neither in `keep`
/// nor always kept. Returns the removed relative paths, sorted.
fn prune_dir(dir: &Path, keep: &BTreeSet<String>, manifest: &FeatureManifest) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_slash_path(dir, entry.path());
        if keep.contains(&rel) || manifest.always_kept(&rel) {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        removed.push(rel);
    }
    Ok(removed)
}

fn relative_slash_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Frontend files still needed by core or an enabled feature.
fn frontend_in_use<'a>(manifest: &'a FeatureManifest, enabled: &[String]) -> BTreeSet<&'a str> {
    let enabled_sets = enabled.iter().filter_map(|id| manifest.features.get(id));
    std::iter::once(&manifest.core)
        .chain(enabled_sets)
        .flat_map(|f| f.views.iter().chain(f.data.iter()))
        .map(String::as_str)
        .collect()
}

/// Rewrite the import and mount blocks of the composition root from the
/// manifest's registration list, keeping only modules whose route file exists.
fn regenerate_composition_root(
    product: ProductId,
    product_dir: &Path,
    manifest: &FeatureManifest,
) -> Result<Vec<String>> {
    let Some(root) = &manifest.composition_root else {
        return Ok(Vec::new());
    };
    let path = product_dir.join(&root.path);
    if !path.exists() {
        return Err(ForgeError::InvalidManifest {
            product: product.to_string(),
            reason: format!("composition root {} is missing from the template", root.path),
        });
    }
    let routes_dir = product_dir.join(&manifest.routes_dir);
    let live: Vec<_> = manifest
        .modules
        .iter()
        .filter(|m| routes_dir.join(&m.file).is_file())
        .collect();

    let content = std::fs::read_to_string(&path)?;
    let imports_indent = marker_indent(&content, IMPORTS_START);
    let mounts_indent = marker_indent(&content, MOUNTS_START);
    let imports: String = live
        .iter()
        .filter_map(|m| manifest.import_line(m))
        .map(|l| format!("{imports_indent}{l}\n"))
        .collect();
    let mounts: String = live
        .iter()
        .filter_map(|m| manifest.mount_line(m))
        .map(|l| format!("{mounts_indent}{l}\n"))
        .collect();

    let missing_markers = || ForgeError::InvalidManifest {
        product: product.to_string(),
        reason: format!(
            "{} must contain {IMPORTS_START}/{IMPORTS_END} and {MOUNTS_START}/{MOUNTS_END} markers",
            root.path
        ),
    };
    let content = io::replace_between_markers(&content, IMPORTS_START, IMPORTS_END, &imports)
        .ok_or_else(missing_markers)?;
    let content = io::replace_between_markers(&content, MOUNTS_START, MOUNTS_END, &mounts)
        .ok_or_else(missing_markers)?;
    io::atomic_write(&path, content.as_bytes())?;

    Ok(live.iter().map(|m| m.file.clone()).collect())
}

/// Leading whitespace of the line that holds `marker`.
fn marker_indent(content: &str, marker: &str) -> String {
    content
        .lines()
        .find(|l| l.contains(marker))
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).collect())
        .unwrap_or_default()
}

/// Replace a data file with a valid, empty value of the same format.
pub fn neutralize(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let empty = match ext.as_str() {
        "json" => {
            let is_object = std::fs::read_to_string(path)
                .ok()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
                .map(|v| v.is_object())
                .unwrap_or(false);
            if is_object { "{}\n" } else { "[]\n" }
        }
        "cjs" => "module.exports = [];\n",
        "js" | "jsx" | "mjs" | "ts" | "tsx" => "export default [];\n",
        "yaml" | "yml" => "[]\n",
        _ => "",
    };
    io::atomic_write(path, empty.as_bytes())
}

/// Mark navigation entries whose `id` is in `hidden` as `"enabled": false`.
fn hide_navigation(path: &Path, hidden: &BTreeSet<String>) -> Result<Vec<String>> {
    if hidden.is_empty() || !path.exists() {
        return Ok(Vec::new());
    }
    let mut doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut touched = Vec::new();
    match &mut doc {
        serde_json::Value::Array(items) => hide_items(items, hidden, &mut touched),
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::Array(items)) = map.get_mut("items") {
                hide_items(items, hidden, &mut touched);
            }
        }
        _ => {}
    }
    if !touched.is_empty() {
        let mut data = serde_json::to_string_pretty(&doc)?;
        data.push('\n');
        io::atomic_write(path, data.as_bytes())?;
    }
    Ok(touched)
}

fn hide_items(items: &mut [serde_json::Value], hidden: &BTreeSet<String>, touched: &mut Vec<String>) {
    for item in items {
        let Some(obj) = item.as_object_mut() else {
            continue;
        };
        let id = obj.get("id").and_then(|v| v.as_str()).map(str::to_string);
        if let Some(id) = id {
            if hidden.contains(&id) {
                obj.insert("enabled".into(), serde_json::Value::Bool(false));
                touched.push(id);
            }
        }
        if let Some(serde_json::Value::Array(children)) = obj.get_mut("children") {
            hide_items(children, hidden, touched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
composition_root:
  path: backend/server.js
navigation: frontend/src/data/navigation.json
core:
  routes: [customers.js]
  services: [customerService.js]
  views: [frontend/src/pages/Dashboard.jsx]
features:
  invoices:
    routes: [invoices.js]
    services: [invoiceService.js]
    views: [frontend/src/pages/Invoices.jsx]
    data: [frontend/src/data/invoices.json]
    nav: [invoices]
  scheduling:
    routes: [schedule.js]
    services: [scheduleService.js]
    views: [frontend/src/pages/Schedule.jsx]
    data: [frontend/src/data/schedule.js]
    nav: [schedule]
modules:
  - { file: customers.js, symbol: customersRouter, mount: /api/customers }
  - { file: invoices.js, symbol: invoicesRouter, mount: /api/invoices }
  - { file: schedule.js, symbol: scheduleRouter, mount: /api/schedule }
"#;

    const SERVER_JS: &str = "const express = require('express');\n\
const auth = require('./routes/auth');\n\
// factory:imports:start\n\
const customersRouter = require('./routes/customers');\n\
const invoicesRouter = require('./routes/invoices');\n\
const scheduleRouter = require('./routes/schedule');\n\
// factory:imports:end\n\
const app = express();\n\
app.use('/api/auth', auth);\n\
function mount() {\n\
  // factory:mounts:start\n\
  app.use('/api/customers', customersRouter);\n\
  app.use('/api/invoices', invoicesRouter);\n\
  app.use('/api/schedule', scheduleRouter);\n\
  // factory:mounts:end\n\
}\n";

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    fn fixture() -> (TempDir, FeatureManifest) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for f in [
            "auth.js",
            "factory.js",
            "packages.js",
            "customers.js",
            "invoices.js",
            "schedule.js",
        ] {
            write(root, &format!("backend/routes/{f}"), "module.exports = {};");
        }
        for f in ["customerService.js", "invoiceService.js", "scheduleService.js"] {
            write(root, &format!("backend/services/{f}"), "");
        }
        write(root, "backend/server.js", SERVER_JS);
        write(root, "frontend/src/pages/Dashboard.jsx", "x");
        write(root, "frontend/src/pages/Invoices.jsx", "x");
        write(root, "frontend/src/pages/Schedule.jsx", "x");
        write(root, "frontend/src/data/invoices.json", "[{\"id\":1}]");
        write(root, "frontend/src/data/schedule.js", "export default [{ day: 1 }];");
        write(
            root,
            "frontend/src/data/navigation.json",
            r#"{"items":[{"id":"dashboard"},{"id":"invoices"},{"id":"more","children":[{"id":"schedule"}]}]}"#,
        );
        let manifest = FeatureManifest::parse(ProductId::Crm, MANIFEST).unwrap();
        (dir, manifest)
    }

    fn backend_files(root: &Path) -> Vec<String> {
        let mut out = Vec::new();
        for dir in ["backend/routes", "backend/services"] {
            for e in std::fs::read_dir(root.join(dir)).unwrap() {
                out.push(format!("{dir}/{}", e.unwrap().file_name().to_string_lossy()));
            }
        }
        out.sort();
        out
    }

    #[test]
    fn empty_selection_keeps_core_and_allowlist_only() {
        let (dir, manifest) = fixture();
        strip(ProductId::Crm, dir.path(), &manifest, &[]).unwrap();
        assert_eq!(
            backend_files(dir.path()),
            vec![
                "backend/routes/auth.js",
                "backend/routes/customers.js",
                "backend/routes/factory.js",
                "backend/routes/packages.js",
                "backend/services/customerService.js",
            ]
        );
    }

    #[test]
    fn composition_root_only_references_existing_routes() {
        let (dir, manifest) = fixture();
        let report = strip(ProductId::Crm, dir.path(), &manifest, &["invoices".into()]).unwrap();
        assert_eq!(report.registered_modules, vec!["customers.js", "invoices.js"]);

        let server = std::fs::read_to_string(dir.path().join("backend/server.js")).unwrap();
        assert!(server.contains("const invoicesRouter = require('./routes/invoices');"));
        assert!(server.contains("  app.use('/api/invoices', invoicesRouter);"));
        assert!(!server.contains("schedule"));
        // Everything outside the markers is untouched.
        assert!(server.contains("const auth = require('./routes/auth');"));

        for line in server.lines().filter(|l| l.contains("require('./routes/")) {
            let stem = line.split("./routes/").nth(1).unwrap().split('\'').next().unwrap();
            assert!(
                dir.path().join(format!("backend/routes/{stem}.js")).exists(),
                "dangling import: {line}"
            );
        }
    }

    #[test]
    fn disabled_frontend_views_deleted_and_data_emptied() {
        let (dir, manifest) = fixture();
        let report = strip(ProductId::Crm, dir.path(), &manifest, &["invoices".into()]).unwrap();
        let root = dir.path();
        assert!(root.join("frontend/src/pages/Invoices.jsx").exists());
        assert!(!root.join("frontend/src/pages/Schedule.jsx").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("frontend/src/data/schedule.js")).unwrap(),
            "export default [];\n"
        );
        assert_eq!(report.neutralized_data, vec!["frontend/src/data/schedule.js"]);
        assert_eq!(
            std::fs::read_to_string(root.join("frontend/src/data/invoices.json")).unwrap(),
            "[{\"id\":1}]"
        );
    }

    #[test]
    fn neutralized_json_stays_parseable() {
        let (dir, manifest) = fixture();
        strip(ProductId::Crm, dir.path(), &manifest, &[]).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("frontend/src/data/invoices.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v, serde_json::json!([]));
    }

    #[test]
    fn neutralize_keeps_object_shape() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("settings.json");
        std::fs::write(&p, r#"{"a":1}"#).unwrap();
        neutralize(&p).unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "{}\n");

        let missing = dir.path().join("nested/missing.yaml");
        neutralize(&missing).unwrap();
        assert_eq!(std::fs::read_to_string(&missing).unwrap(), "[]\n");
    }

    #[test]
    fn navigation_entries_hidden_recursively() {
        let (dir, manifest) = fixture();
        let report = strip(ProductId::Crm, dir.path(), &manifest, &[]).unwrap();
        assert_eq!(report.hidden_nav, vec!["invoices", "schedule"]);
        let nav: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("frontend/src/data/navigation.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(nav["items"][1]["enabled"], false);
        assert_eq!(nav["items"][2]["children"][0]["enabled"], false);
        assert!(nav["items"][0].get("enabled").is_none());
    }

    #[test]
    fn unknown_feature_fails_before_deleting_anything() {
        let (dir, manifest) = fixture();
        let before = backend_files(dir.path());
        let err = strip(ProductId::Crm, dir.path(), &manifest, &["payroll".into()]).unwrap_err();
        assert!(matches!(err, ForgeError::UnknownFeature { .. }));
        assert_eq!(backend_files(dir.path()), before);
    }

    #[test]
    fn composition_root_without_markers_is_rejected() {
        let (dir, manifest) = fixture();
        std::fs::write(dir.path().join("backend/server.js"), "const app = 1;\n").unwrap();
        let err = strip(ProductId::Crm, dir.path(), &manifest, &[]).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidManifest { .. }));
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let base = PathBuf::from("/a/b");
        assert_eq!(relative_slash_path(&base, &base.join("c").join("d.js")), "c/d.js");
    }
}
