//! Read-only template repositories.
//!
//! Builds never look templates up from ambient global state: the generator is
//! handed an `Arc<dyn TemplateStore>` so tests can swap in fixture trees.

use crate::error::{ForgeError, Result};
use crate::io;
use crate::manifest::{FeatureManifest, MANIFEST_FILE};
use crate::product::ProductId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use walkdir::WalkDir;

/// Directory and file names never copied out of a template tree.
const SKIPPED_NAMES: &[&str] = &[".git", "node_modules", ".DS_Store"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    /// Path relative to the product template root.
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub executable: bool,
}

impl TemplateFile {
    pub fn text(path: impl Into<PathBuf>, contents: &str) -> Self {
        Self {
            path: path.into(),
            contents: contents.as_bytes().to_vec(),
            executable: false,
        }
    }
}

pub trait TemplateStore: Send + Sync {
    /// Every file of the product's template, sorted by path.
    fn files(&self, product: ProductId) -> Result<Vec<TemplateFile>>;

    /// The product's feature manifest, or `None` when the template has none.
    fn manifest(&self, product: ProductId) -> Result<Option<Arc<FeatureManifest>>>;

    fn version(&self, product: ProductId) -> Option<String>;
}

/// Walk `dir` and load every file, skipping infrastructure paths and the
/// manifest at the tree root.
pub fn load_dir(dir: &Path) -> Result<Vec<TemplateFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !SKIPPED_NAMES.contains(&&*name)
        });
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .to_path_buf();
        if rel == Path::new(MANIFEST_FILE) {
            continue;
        }
        let meta = entry.metadata()?;
        files.push(TemplateFile {
            contents: std::fs::read(entry.path())?,
            executable: io::is_executable(&meta),
            path: rel,
        });
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// FsTemplateStore
// ---------------------------------------------------------------------------

/// Templates laid out as `<root>/<product-slug>/…` on disk.
pub struct FsTemplateStore {
    root: PathBuf,
    manifests: RwLock<HashMap<ProductId, Option<Arc<FeatureManifest>>>>,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifests: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn product_dir(&self, product: ProductId) -> PathBuf {
        self.root.join(product.as_str())
    }

    fn require_dir(&self, product: ProductId) -> Result<PathBuf> {
        let dir = self.product_dir(product);
        if !dir.is_dir() {
            return Err(ForgeError::TemplateMissing {
                product: product.to_string(),
                path: dir,
            });
        }
        Ok(dir)
    }
}

impl TemplateStore for FsTemplateStore {
    fn files(&self, product: ProductId) -> Result<Vec<TemplateFile>> {
        let dir = self.require_dir(product)?;
        load_dir(&dir)
    }

    fn manifest(&self, product: ProductId) -> Result<Option<Arc<FeatureManifest>>> {
        if let Ok(cache) = self.manifests.read() {
            if let Some(cached) = cache.get(&product) {
                return Ok(cached.clone());
            }
        }
        let dir = self.require_dir(product)?;
        let loaded = FeatureManifest::load(product, &dir)?.map(Arc::new);
        if let Ok(mut cache) = self.manifests.write() {
            cache.insert(product, loaded.clone());
        }
        Ok(loaded)
    }

    fn version(&self, product: ProductId) -> Option<String> {
        let file = self.product_dir(product).join("VERSION");
        if let Ok(v) = std::fs::read_to_string(file) {
            return Some(v.trim().to_string());
        }
        self.manifest(product)
            .ok()
            .flatten()
            .map(|m| m.version.to_string())
    }
}

// ---------------------------------------------------------------------------
// MemoryTemplateStore
// ---------------------------------------------------------------------------

/// In-memory fixture store.
#[derive(Default)]
pub struct MemoryTemplateStore {
    files: HashMap<ProductId, Vec<TemplateFile>>,
    manifests: HashMap<ProductId, Arc<FeatureManifest>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, product: ProductId, file: TemplateFile) -> Self {
        let files = self.files.entry(product).or_default();
        files.push(file);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }

    pub fn with_text(self, product: ProductId, path: &str, contents: &str) -> Self {
        self.with_file(product, TemplateFile::text(path, contents))
    }

    pub fn with_manifest(mut self, product: ProductId, manifest: FeatureManifest) -> Self {
        self.files.entry(product).or_default();
        self.manifests.insert(product, Arc::new(manifest));
        self
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn files(&self, product: ProductId) -> Result<Vec<TemplateFile>> {
        self.files
            .get(&product)
            .cloned()
            .ok_or_else(|| ForgeError::TemplateMissing {
                product: product.to_string(),
                path: PathBuf::from(format!("memory://{product}")),
            })
    }

    fn manifest(&self, product: ProductId) -> Result<Option<Arc<FeatureManifest>>> {
        Ok(self.manifests.get(&product).cloned())
    }

    fn version(&self, product: ProductId) -> Option<String> {
        self.manifests.get(&product).map(|m| m.version.to_string())
    }
}
