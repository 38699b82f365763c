//! Build-scoped scratch directories.
//!
//! A [`Workspace`] owns `<work_root>/<build_id>` exclusively for the lifetime
//! of one build and removes it when dropped, on success and error paths alike.

use crate::error::{ForgeError, Result};
use crate::product::ProductId;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    build_id: String,
    removed: bool,
}

impl Workspace {
    /// Create `<work_root>/<build_id>`. Fails if the directory already exists.
    pub fn create(work_root: &Path, build_id: &str) -> Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let root = work_root.join(build_id);
        match std::fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ForgeError::WorkspaceExists(root));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(build_id, path = %root.display(), "workspace created");
        Ok(Self {
            root,
            build_id: build_id.to_string(),
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Top-level directory of a product before nesting is applied.
    pub fn product_dir(&self, product: ProductId) -> PathBuf {
        self.root.join(product.as_str())
    }

    /// Remove the tree now and surface any error instead of logging it.
    pub fn close(mut self) -> Result<()> {
        self.removed = true;
        remove_tree(&self.root)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_tree(&self.root) {
            warn!(build_id = %self.build_id, error = %e, "failed to remove workspace");
        }
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
