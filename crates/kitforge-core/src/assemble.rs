//! Final package layout, generated setup artifacts and the deterministic zip
//! archive.

use crate::build_config::{BuildConfig, BuildContext};
use crate::error::{ForgeError, Result};
use crate::io;
use crate::product::{self, ProductId};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SETUP_GUIDE: &str = "SETUP.md";
pub const SETUP_SCRIPT: &str = "setup.sh";
pub const DEPLOY_DESCRIPTOR: &str = "render.yaml";

/// Where the admin panel lands inside the site when both are selected.
pub const NESTED_ADMIN_DIR: &str = "site/admin";

const COMPRESSION_LEVEL: i64 = 9;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Product → directory relative to the archive root, in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub entries: Vec<(ProductId, String)>,
}

impl Layout {
    pub fn dir(&self, product: ProductId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| *p == product)
            .map(|(_, d)| d.as_str())
    }

    pub fn admin_nested(&self) -> bool {
        self.dir(ProductId::Admin) == Some(NESTED_ADMIN_DIR)
    }
}

pub fn layout(products: &[ProductId]) -> Layout {
    let selected = product::canonical(products);
    let has_site = selected.contains(&ProductId::Site);
    let entries = selected
        .into_iter()
        .map(|p| {
            let dir = match p {
                ProductId::Admin if has_site => NESTED_ADMIN_DIR.to_string(),
                other => other.as_str().to_string(),
            };
            (p, dir)
        })
        .collect();
    Layout { entries }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssemblyReport {
    pub admin_nested: bool,
    /// Descriptor paths found in product trees, relative to the workspace.
    pub descriptors: Vec<String>,
    pub root_descriptor: bool,
}

/// Arrange the workspace into its final archive layout and write the setup
/// guide, setup script and merged deployment descriptor.
pub fn assemble(workspace: &Path, config: &BuildConfig, ctx: &BuildContext) -> Result<AssemblyReport> {
    let layout = layout(&config.products);
    let mut report = AssemblyReport::default();

    if layout.admin_nested() {
        let from = workspace.join(ProductId::Admin.as_str());
        let to = workspace.join(NESTED_ADMIN_DIR);
        if to.exists() {
            return Err(ForgeError::Archive(format!(
                "site template already contains {NESTED_ADMIN_DIR}"
            )));
        }
        std::fs::rename(&from, &to)?;
        report.admin_nested = true;
        debug!(build_id = %ctx.build_id, "admin panel nested under site");
    }

    io::atomic_write(
        &workspace.join(SETUP_GUIDE),
        setup_guide(config, ctx, &layout).as_bytes(),
    )?;
    let script = workspace.join(SETUP_SCRIPT);
    io::atomic_write(&script, setup_script(&layout).as_bytes())?;
    io::set_executable(&script, true)?;

    let mut merged: Option<Mapping> = None;
    for (product, dir) in &layout.entries {
        let rel = format!("{dir}/{DEPLOY_DESCRIPTOR}");
        let path = workspace.join(&rel);
        if !path.is_file() {
            continue;
        }
        let descriptor: Value = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
        let Value::Mapping(map) = descriptor else {
            return Err(ForgeError::Archive(format!("{rel} is not a YAML mapping")));
        };
        merge_descriptor(merged.get_or_insert_with(Mapping::new), map, dir);
        debug!(product = %product, descriptor = %rel, "deployment descriptor collected");
        report.descriptors.push(rel);
    }
    if let Some(map) = merged {
        let data = serde_yaml::to_string(&Value::Mapping(map))?;
        io::atomic_write(&workspace.join(DEPLOY_DESCRIPTOR), data.as_bytes())?;
        report.root_descriptor = true;
    }
    Ok(report)
}

/// Concatenate `services`/`databases` lists, pointing each service at its
/// product directory. Other top-level keys keep their first value.
fn merge_descriptor(into: &mut Mapping, from: Mapping, product_dir: &str) {
    for (key, value) in from {
        let is_services = match key.as_str() {
            Some("services") => Some(true),
            Some("databases") => Some(false),
            _ => None,
        };
        match (is_services, value) {
            (Some(is_services), Value::Sequence(items)) => {
                let items: Vec<Value> = items
                    .into_iter()
                    .map(|item| {
                        if is_services {
                            with_root_dir(item, product_dir)
                        } else {
                            item
                        }
                    })
                    .collect();
                match into.get_mut(&key) {
                    Some(Value::Sequence(existing)) => existing.extend(items),
                    _ => {
                        into.insert(key, Value::Sequence(items));
                    }
                }
            }
            (_, value) => {
                if !into.contains_key(&key) {
                    into.insert(key, value);
                }
            }
        }
    }
}

fn with_root_dir(service: Value, product_dir: &str) -> Value {
    let Value::Mapping(mut map) = service else {
        return service;
    };
    let key = Value::String("rootDir".into());
    let root = match map.get(&key).and_then(Value::as_str) {
        Some(existing) => {
            let existing = existing.trim_start_matches("./").trim_end_matches('/');
            if existing.is_empty() || existing == "." {
                product_dir.to_string()
            } else {
                format!("{product_dir}/{existing}")
            }
        }
        None => product_dir.to_string(),
    };
    map.insert(key, Value::String(root));
    Value::Mapping(map)
}

fn setup_guide(config: &BuildConfig, ctx: &BuildContext, layout: &Layout) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} setup guide\n", config.company.name.trim());
    let _ = writeln!(out, "Build `{}`.\n", ctx.build_id);
    out.push_str("Requires Node.js 18 or newer. Run `./setup.sh` to perform every step below,\n");
    out.push_str("or follow them by hand.\n\n");
    out.push_str("## Default credentials\n\n");
    let admin = config
        .company
        .email
        .clone()
        .unwrap_or_else(|| format!("admin@{}.local", config.company_slug()));
    let _ = writeln!(out, "- Login: `{admin}`");
    let _ = writeln!(out, "- Password: `{}`", ctx.secrets.default_password);
    out.push_str("\nChange the password after your first login.\n");

    for (product, dir) in &layout.entries {
        let _ = writeln!(out, "\n## {} (`{dir}/`)\n", product.display_name());
        for step in product.setup_steps() {
            let _ = writeln!(out, "{}:\n", step.label);
            out.push_str("```sh\n");
            let _ = writeln!(out, "cd {}", step_dir(dir, step.dir));
            for cmd in step.commands {
                let _ = writeln!(out, "{cmd}");
            }
            out.push_str("```\n\n");
        }
    }
    out
}

fn setup_script(layout: &Layout) -> String {
    let mut out = String::from("#!/usr/bin/env bash\nset -euo pipefail\ncd \"$(dirname \"$0\")\"\n");
    for (product, dir) in &layout.entries {
        for step in product.setup_steps() {
            let _ = writeln!(out, "\necho \"==> {}\"", step.label);
            let _ = writeln!(
                out,
                "(cd {} && {})",
                step_dir(dir, step.dir),
                step.commands.join(" && ")
            );
        }
    }
    out.push_str("\necho \"Setup complete.\"\n");
    out
}

fn step_dir(product_dir: &str, step_dir: &str) -> String {
    if step_dir == "." {
        product_dir.to_string()
    } else {
        format!("{product_dir}/{step_dir}")
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub entries: usize,
}

/// Zip `source_dir` into `dest`. Entries are sorted by path and carry a fixed
/// timestamp, so identical trees produce identical bytes. `dest` only appears
/// once the archive is complete.
pub fn archive(source_dir: &Path, dest: &Path) -> Result<ArchiveSummary> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(source_dir).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| ForgeError::Archive(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((rel, entry.path().to_path_buf(), entry.file_type().is_dir()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let parent = dest.parent().unwrap_or(Path::new("."));
    io::ensure_dir(parent)?;
    let tmp = NamedTempFile::new_in(parent)?;
    let mut zip = ZipWriter::new(tmp.reopen()?);
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(zip::DateTime::default());

    for (rel, path, is_dir) in &entries {
        let mode = unix_mode(path, *is_dir)?;
        let options = base.unix_permissions(mode);
        if *is_dir {
            zip.add_directory(format!("{rel}/"), options)?;
        } else {
            zip.start_file(rel.as_str(), options)?;
            let mut file = File::open(path)?;
            std::io::copy(&mut file, &mut zip)?;
        }
    }
    zip.finish()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    let (sha256, size_bytes) = digest_file(dest)?;
    info!(
        archive = %dest.display(),
        entries = entries.len(),
        size_bytes,
        "archive written"
    );
    Ok(ArchiveSummary {
        path: dest.to_path_buf(),
        sha256,
        size_bytes,
        entries: entries.len(),
    })
}

/// Hex sha256 and byte length of a file.
pub fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(unix)]
fn unix_mode(path: &Path, _is_dir: bool) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn unix_mode(_path: &Path, is_dir: bool) -> Result<u32> {
    Ok(if is_dir { 0o755 } else { 0o644 })
}
