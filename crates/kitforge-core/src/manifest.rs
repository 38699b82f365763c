//! Declarative per-product feature manifest.
//!
//! The manifest lives at `<template>/feature-manifest.yaml` and maps every
//! selectable feature id to the backend and frontend files it needs, plus the
//! registration list from which the composition root's module blocks are
//! generated.

use crate::error::{ForgeError, Result};
use crate::product::ProductId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const MANIFEST_FILE: &str = "feature-manifest.yaml";

/// Route/service file stems that survive every feature selection: without
/// them the generated package could not log in or manage itself.
pub const ALWAYS_KEPT: &[&str] = &["auth", "factory", "packages"];

pub const IMPORTS_START: &str = "factory:imports:start";
pub const IMPORTS_END: &str = "factory:imports:end";
pub const MOUNTS_START: &str = "factory:mounts:start";
pub const MOUNTS_END: &str = "factory:mounts:end";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Files required by one feature (or by the `core` pseudo-feature).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFiles {
    /// File names inside `routes_dir`.
    #[serde(default)]
    pub routes: Vec<String>,
    /// File names inside `services_dir`.
    #[serde(default)]
    pub services: Vec<String>,
    /// Frontend view files, relative to the product root. Deleted when disabled.
    #[serde(default)]
    pub views: Vec<String>,
    /// Frontend data files, relative to the product root. Emptied when disabled.
    #[serde(default)]
    pub data: Vec<String>,
    /// Navigation item ids hidden when the feature is disabled.
    #[serde(default)]
    pub nav: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRoot {
    /// Path relative to the product root, e.g. `backend/server.js`.
    pub path: String,
    /// Line template; `{symbol}`, `{stem}`, `{file}` and `{mount}` are expanded.
    #[serde(default = "default_import")]
    pub import: String,
    #[serde(default = "default_mount")]
    pub mount: String,
}

fn default_import() -> String {
    "const {symbol} = require('./routes/{stem}');".to_string()
}

fn default_mount() -> String {
    "app.use('{mount}', {symbol});".to_string()
}

/// One optional backend module the composition root registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRegistration {
    /// Route file name inside `routes_dir`.
    pub file: String,
    pub symbol: String,
    pub mount: String,
}

impl ModuleRegistration {
    pub fn stem(&self) -> &str {
        file_stem(&self.file)
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{symbol}", &self.symbol)
            .replace("{stem}", self.stem())
            .replace("{file}", &self.file)
            .replace("{mount}", &self.mount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureManifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_routes_dir")]
    pub routes_dir: String,
    #[serde(default = "default_services_dir")]
    pub services_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_root: Option<CompositionRoot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<String>,
    #[serde(default)]
    pub core: FeatureFiles,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureFiles>,
    #[serde(default)]
    pub modules: Vec<ModuleRegistration>,
    /// Extra route/service file names kept regardless of selection.
    #[serde(default)]
    pub keep: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_routes_dir() -> String {
    "backend/routes".to_string()
}

fn default_services_dir() -> String {
    "backend/services".to_string()
}

/// Backend file names retained for a feature selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retained {
    pub routes: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Behaviour
// ---------------------------------------------------------------------------

impl FeatureManifest {
    pub fn parse(product: ProductId, data: &str) -> Result<Self> {
        let manifest: FeatureManifest =
            serde_yaml::from_str(data).map_err(|e| ForgeError::InvalidManifest {
                product: product.to_string(),
                reason: e.to_string(),
            })?;
        manifest.validate(product)?;
        Ok(manifest)
    }

    pub fn load(product: ProductId, template_root: &Path) -> Result<Option<Self>> {
        let path = template_root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Self::parse(product, &data).map(Some)
    }

    fn validate(&self, product: ProductId) -> Result<()> {
        let invalid = |reason: String| ForgeError::InvalidManifest {
            product: product.to_string(),
            reason,
        };
        if self.features.contains_key("core") {
            return Err(invalid("'core' is reserved and cannot be a feature id".into()));
        }
        for m in &self.modules {
            if m.symbol.trim().is_empty() || m.file.trim().is_empty() {
                return Err(invalid(format!(
                    "module registration for '{}' needs a file and a symbol",
                    m.file
                )));
            }
        }
        if !self.modules.is_empty() && self.composition_root.is_none() {
            return Err(invalid(
                "modules are declared but no composition_root is configured".into(),
            ));
        }
        Ok(())
    }

    /// Fail on the first enabled id the manifest does not declare.
    pub fn check_features(&self, product: ProductId, enabled: &[String]) -> Result<()> {
        for id in enabled {
            if !self.features.contains_key(id) {
                return Err(ForgeError::UnknownFeature {
                    product: product.to_string(),
                    feature: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// `core ∪ ⋃ features[id]` for the backend file sets.
    pub fn retained(&self, enabled: &[String]) -> Retained {
        let mut out = Retained::default();
        let enabled_sets = enabled.iter().filter_map(|id| self.features.get(id));
        for files in std::iter::once(&self.core).chain(enabled_sets) {
            out.routes.extend(files.routes.iter().cloned());
            out.services.extend(files.services.iter().cloned());
        }
        out
    }

    /// Features declared in the manifest but not enabled, in id order.
    pub fn disabled<'a>(&'a self, enabled: &[String]) -> Vec<(&'a str, &'a FeatureFiles)> {
        self.features
            .iter()
            .filter(|(id, _)| !enabled.contains(id))
            .map(|(id, files)| (id.as_str(), files))
            .collect()
    }

    /// Whether a backend file survives regardless of the selection.
    pub fn always_kept(&self, file_name: &str) -> bool {
        ALWAYS_KEPT.contains(&file_stem(file_name)) || self.keep.iter().any(|k| k == file_name)
    }

    pub fn import_line(&self, module: &ModuleRegistration) -> Option<String> {
        self.composition_root
            .as_ref()
            .map(|root| module.expand(&root.import))
    }

    pub fn mount_line(&self, module: &ModuleRegistration) -> Option<String> {
        self.composition_root
            .as_ref()
            .map(|root| module.expand(&root.mount))
    }

    /// Every file the manifest references, relative to the template root.
    pub fn referenced_paths(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for files in std::iter::once(&self.core).chain(self.features.values()) {
            for r in &files.routes {
                out.insert(format!("{}/{}", self.routes_dir, r));
            }
            for s in &files.services {
                out.insert(format!("{}/{}", self.services_dir, s));
            }
            out.extend(files.views.iter().cloned());
            out.extend(files.data.iter().cloned());
        }
        if let Some(root) = &self.composition_root {
            out.insert(root.path.clone());
        }
        if let Some(nav) = &self.navigation {
            out.insert(nav.clone());
        }
        out
    }

    /// Referenced files that are missing from `template_root`.
    pub fn check(&self, template_root: &Path) -> Vec<String> {
        self.referenced_paths()
            .into_iter()
            .filter(|rel| !template_root.join(rel).exists())
            .collect()
    }
}

/// File name without its last extension (`invoices.routes.js` → `invoices.routes`).
pub fn file_stem(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(i) => &base[..i],
    }
}
