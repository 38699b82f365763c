use crate::error::{ForgeError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "kitforge.yaml";
pub const DATA_DIR: &str = ".kitforge";
pub const TEMPLATES_DIR: &str = "templates";

pub const LEDGER_FILE: &str = "ledger.redb";
pub const WORK_DIR: &str = "work";
pub const ARCHIVES_DIR: &str = "archives";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn ledger_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LEDGER_FILE)
}

/// Parent of every build workspace.
pub fn work_root(data_dir: &Path) -> PathBuf {
    data_dir.join(WORK_DIR)
}

/// Where finished archives wait before (or instead of) upload.
pub fn archives_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(ARCHIVES_DIR)
}

/// `path` itself when absolute, otherwise `root/path`.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("valid id regex")
    })
}

/// Tenant and build ids end up in file names, object keys and URLs.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(ForgeError::InvalidConfig(format!(
            "invalid id '{id}': use lowercase letters, digits and hyphens"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
