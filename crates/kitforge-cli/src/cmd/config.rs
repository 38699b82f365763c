use crate::output::{label, print_json};
use clap::Subcommand;
use kitforge_core::config::{Settings, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective settings (credentials are never printed)
    Show,
    /// Validate the settings for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root)?;
    let value = serde_json::json!({
        "environment": settings.environment,
        "templates_dir": settings.templates_dir,
        "data_dir": settings.data_dir,
        "storage": {
            "backend": settings.storage.backend,
            "bucket": settings.storage.bucket,
            "region": settings.storage.region,
        },
        "deploy_configured": settings.deploy_configured(),
        "bind": settings.server.bind,
    });

    if json {
        return print_json(&value);
    }
    println!("Environment:  {}", label(&settings.environment));
    println!("Templates:    {}", settings.templates_dir.display());
    println!("Data:         {}", settings.data_dir.display());
    match &settings.storage.bucket {
        Some(bucket) => println!("Storage:      {} ({bucket})", settings.storage.backend),
        None => println!("Storage:      {}", settings.storage.backend),
    }
    println!(
        "Deployments:  {}",
        if settings.deploy_configured() { "enabled" } else { "disabled" }
    );
    println!("Bind:         {}", settings.server.bind);
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root)?;
    let warnings = settings.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if Settings::has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
