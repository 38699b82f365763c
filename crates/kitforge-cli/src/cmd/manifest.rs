use crate::output::print_json;
use clap::Subcommand;
use kitforge_core::manifest::FeatureManifest;
use kitforge_core::ProductId;
use serde::Serialize;
use std::path::Path;

#[derive(Subcommand)]
pub enum ManifestSubcommand {
    /// Report manifest entries that point at files missing from the template
    Check {
        /// Only check this product (site, admin, crm)
        #[arg(long)]
        product: Option<ProductId>,
    },
}

#[derive(Debug, Serialize)]
struct ProductCheck {
    product: ProductId,
    /// `false` when the template ships no manifest.
    has_manifest: bool,
    features: Vec<String>,
    missing: Vec<String>,
}

pub fn run(root: &Path, subcmd: ManifestSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ManifestSubcommand::Check { product } => check(root, product, json),
    }
}

fn check(root: &Path, only: Option<ProductId>, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root)?;
    let products: Vec<ProductId> = match only {
        Some(p) => vec![p],
        None => ProductId::all()
            .iter()
            .copied()
            .filter(|p| settings.templates_dir.join(p.as_str()).is_dir())
            .collect(),
    };
    if products.is_empty() {
        anyhow::bail!(
            "no product templates found under {}",
            settings.templates_dir.display()
        );
    }

    let mut results = Vec::new();
    for product in products {
        let dir = settings.templates_dir.join(product.as_str());
        if !dir.is_dir() {
            anyhow::bail!("no template for {product} at {}", dir.display());
        }
        let result = match FeatureManifest::load(product, &dir)? {
            Some(manifest) => ProductCheck {
                product,
                has_manifest: true,
                features: manifest.features.keys().cloned().collect(),
                missing: manifest.check(&dir),
            },
            None => ProductCheck {
                product,
                has_manifest: false,
                features: Vec::new(),
                missing: Vec::new(),
            },
        };
        results.push(result);
    }

    if json {
        print_json(&results)?;
    } else {
        for r in &results {
            if !r.has_manifest {
                println!("{}: no feature manifest", r.product);
            } else if r.missing.is_empty() {
                println!("{}: ok ({} features)", r.product, r.features.len());
            } else {
                println!("{}: {} missing file(s)", r.product, r.missing.len());
                for m in &r.missing {
                    println!("  {m}");
                }
            }
        }
    }

    let missing: usize = results.iter().map(|r| r.missing.len()).sum();
    if missing > 0 {
        anyhow::bail!("manifest check found {missing} missing file(s)");
    }
    Ok(())
}
