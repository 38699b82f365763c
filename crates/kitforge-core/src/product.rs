use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ProductId
// ---------------------------------------------------------------------------

/// The fixed set of product templates a customer can select.
///
/// Variant order is the canonical order used everywhere output is ordered:
/// workspace layout, setup guide, product slug and archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductId {
    /// Public marketing site.
    Site,
    /// Admin panel for editing the site's content.
    Admin,
    /// Business-management backend with its own dashboard frontend.
    Crm,
}

/// One step of the generated setup guide and script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupStep {
    pub label: &'static str,
    /// Directory relative to the product root; `"."` is the root itself.
    pub dir: &'static str,
    pub commands: &'static [&'static str],
}

impl ProductId {
    pub fn all() -> &'static [ProductId] {
        &[ProductId::Site, ProductId::Admin, ProductId::Crm]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductId::Site => "site",
            ProductId::Admin => "admin",
            ProductId::Crm => "crm",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProductId::Site => "Public website",
            ProductId::Admin => "Admin panel",
            ProductId::Crm => "Business manager",
        }
    }

    /// Where decoded branding images are written, relative to the product root.
    pub fn asset_dir(self) -> &'static str {
        match self {
            ProductId::Site => "public/images",
            ProductId::Admin => "public/brand",
            ProductId::Crm => "frontend/public/brand",
        }
    }

    /// URL prefix under which `asset_dir` is served by the running app.
    pub fn asset_url_prefix(self) -> &'static str {
        match self {
            ProductId::Site => "/images",
            ProductId::Admin | ProductId::Crm => "/brand",
        }
    }

    /// Settings record that references branding asset paths.
    pub fn settings_file(self) -> &'static str {
        match self {
            ProductId::Site | ProductId::Admin => "src/data/settings.json",
            ProductId::Crm => "backend/seed/settings.json",
        }
    }

    /// Structured copy (about text, calls to action) merged from the wizard.
    pub fn content_file(self) -> Option<&'static str> {
        match self {
            ProductId::Site => Some("src/data/content.json"),
            ProductId::Admin | ProductId::Crm => None,
        }
    }

    /// Service catalogue merged from the wizard.
    pub fn services_file(self) -> Option<&'static str> {
        match self {
            ProductId::Site => Some("src/data/services.json"),
            ProductId::Crm => Some("backend/seed/services.json"),
            ProductId::Admin => None,
        }
    }

    pub fn setup_steps(self) -> &'static [SetupStep] {
        match self {
            ProductId::Site => &[SetupStep {
                label: "Install and build the public website",
                dir: ".",
                commands: &["npm install", "npm run build"],
            }],
            ProductId::Admin => &[SetupStep {
                label: "Install and build the admin panel",
                dir: ".",
                commands: &["npm install", "npm run build"],
            }],
            ProductId::Crm => &[
                SetupStep {
                    label: "Install the business manager API and seed the database",
                    dir: "backend",
                    commands: &["npm install", "npm run seed"],
                },
                SetupStep {
                    label: "Build the business manager dashboard",
                    dir: "frontend",
                    commands: &["npm install", "npm run build"],
                },
            ],
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProductId {
    type Err = crate::error::ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "site" => Ok(ProductId::Site),
            "admin" => Ok(ProductId::Admin),
            "crm" => Ok(ProductId::Crm),
            _ => Err(crate::error::ForgeError::UnknownProduct(s.to_string())),
        }
    }
}

/// Sort and deduplicate a product selection into canonical order.
pub fn canonical(products: &[ProductId]) -> Vec<ProductId> {
    let mut out = products.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Selected slugs joined by `-` in canonical order, e.g. `site-admin`.
pub fn product_slug(products: &[ProductId]) -> String {
    canonical(products)
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join("-")
}
