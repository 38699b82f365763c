use crate::output::{human_size, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use kitforge_core::io::atomic_write;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum BuildsSubcommand {
    /// List recorded builds, newest first
    List {
        /// Only builds for this tenant
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Show one build and its recorded config
    Show { id: String },
    /// Re-run the pipeline from the recorded config, replacing the archive
    Regenerate { id: String },
    /// Write the build's archive to disk
    Download {
        id: String,
        /// Destination file (default: the archive's own name in the current directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Discard the archive and forget the build
    Delete { id: String },
}

pub fn run(root: &Path, subcmd: BuildsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        BuildsSubcommand::List { tenant } => list(root, tenant, json),
        BuildsSubcommand::Show { id } => show(root, &id, json),
        BuildsSubcommand::Regenerate { id } => regenerate(root, &id, json),
        BuildsSubcommand::Download { id, out } => download(root, &id, out, json),
        BuildsSubcommand::Delete { id } => delete(root, &id, json),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(root: &Path, tenant: Option<String>, json: bool) -> anyhow::Result<()> {
    let builds = super::block_on(async {
        let state = super::open_state(root).await?;
        Ok::<_, anyhow::Error>(state.builds.list(tenant).await?)
    })??;

    if json {
        return print_json(&builds);
    }
    if builds.is_empty() {
        println!("No builds.");
        return Ok(());
    }
    let rows = builds
        .iter()
        .map(|b| {
            vec![
                b.id.clone(),
                b.tenant_id.clone(),
                b.product_slug.clone(),
                human_size(b.size_bytes),
                b.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "TENANT", "PRODUCTS", "SIZE", "CREATED"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (build, location) = super::block_on(async {
        let state = super::open_state(root).await?;
        Ok::<_, anyhow::Error>(state.builds.locate(id).await?)
    })??;

    if json {
        let mut value = serde_json::to_value(&build)?;
        value["location"] = serde_json::json!(location);
        return print_json(&value);
    }

    println!("Build:     {}", build.id);
    println!("Tenant:    {}", build.tenant_id);
    println!("Company:   {}", build.config.company.name);
    println!("Products:  {}", build.product_slug);
    for (product, features) in &build.features {
        println!("  {product}: {}", features.join(", "));
    }
    println!("Archive:   {} ({})", build.archive_filename, human_size(build.size_bytes));
    println!("Storage:   {} {}", build.storage.backend, build.storage.key);
    match location {
        Some(l) => println!("Location:  {l}"),
        None => println!("Location:  (archive missing)"),
    }
    println!("SHA-256:   {}", build.sha256);
    println!("Created:   {}", build.created_at.to_rfc3339());
    if build.updated_at != build.created_at {
        println!("Updated:   {}", build.updated_at.to_rfc3339());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// regenerate
// ---------------------------------------------------------------------------

fn regenerate(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let built = super::block_on(async {
        let state = super::open_state(root).await?;
        Ok::<_, anyhow::Error>(state.builds.regenerate(id).await?)
    })??;

    if json {
        return print_json(&built);
    }
    super::generate::print_summary(&built);
    Ok(())
}

// ---------------------------------------------------------------------------
// download
// ---------------------------------------------------------------------------

fn download(root: &Path, id: &str, out: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let (build, bytes) = super::block_on(async {
        let state = super::open_state(root).await?;
        let build = state.builds.get(id).await?;
        let bytes = state.builds.storage().fetch(&build.storage).await?;
        Ok::<_, anyhow::Error>((build, bytes))
    })??;

    let dest = out.unwrap_or_else(|| PathBuf::from(&build.archive_filename));
    atomic_write(&dest, &bytes).with_context(|| format!("cannot write {}", dest.display()))?;

    if json {
        return print_json(&serde_json::json!({
            "id": build.id,
            "path": dest,
            "size_bytes": bytes.len(),
        }));
    }
    println!("Wrote {} ({})", dest.display(), human_size(bytes.len() as u64));
    Ok(())
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

fn delete(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let removed = super::block_on(async {
        let state = super::open_state(root).await?;
        Ok::<_, anyhow::Error>(state.builds.delete(id).await?)
    })??;

    if json {
        return print_json(&serde_json::json!({
            "deleted": removed.id,
            "tenant_id": removed.tenant_id,
        }));
    }
    println!("Deleted build {} ({})", removed.id, removed.archive_filename);
    Ok(())
}
