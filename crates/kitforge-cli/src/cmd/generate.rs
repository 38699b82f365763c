use crate::output::{human_size, print_json};
use anyhow::Context;
use kitforge_cloud::StoredBuild;
use kitforge_core::BuildConfig;
use std::path::Path;

/// Read a build config from YAML or JSON.
pub fn read_config(path: &Path) -> anyhow::Result<BuildConfig> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read build config {}", path.display()))?;
    serde_yaml::from_str(&data)
        .with_context(|| format!("invalid build config {}", path.display()))
}

pub fn run(root: &Path, config_path: &Path, tenant: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = read_config(config_path)?;
    let built = super::block_on(async {
        let state = super::open_state(root).await?;
        let built = state.builds.create(tenant, config).await?;
        Ok::<_, anyhow::Error>(built)
    })??;

    if json {
        return print_json(&built);
    }
    print_summary(&built);
    Ok(())
}

pub fn print_summary(built: &StoredBuild) {
    println!("Build:     {}", built.build_id);
    println!("Tenant:    {}", built.tenant_id);
    println!("Archive:   {}", built.archive_filename);
    if let Some(url) = &built.download_url {
        println!("Location:  {url}");
    }
    println!("Size:      {}", human_size(built.size_bytes));
    println!("SHA-256:   {}", built.sha256);
    println!("Admin password (shown once): {}", built.default_password);

    let report = &built.report;
    if !report.injected_assets.is_empty() {
        println!("\nInjected assets:");
        for a in &report.injected_assets {
            println!("  {a}");
        }
    }
    if !report.unresolved_tokens.is_empty() {
        println!("\nUnresolved tokens:");
        for (file, tokens) in &report.unresolved_tokens {
            println!("  {file}: {}", tokens.join(", "));
        }
    }
    for w in &report.warnings {
        println!("[warning] {w}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitforge_core::ProductId;
    use tempfile::TempDir;

    #[test]
    fn reads_yaml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme.yaml");
        std::fs::write(
            &path,
            "products: [crm, site]\ncompany:\n  name: Acme Roofing\nfeatures:\n  crm: [invoices]\n",
        )
        .unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.products, vec![ProductId::Crm, ProductId::Site]);
        assert_eq!(config.enabled_features(ProductId::Crm), ["invoices".to_string()]);
    }

    #[test]
    fn reads_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme.json");
        std::fs::write(&path, r#"{"products":["site"],"company":{"name":"Acme"}}"#).unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.company.name, "Acme");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_config(Path::new("/nonexistent/acme.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/acme.yaml"));
    }
}
