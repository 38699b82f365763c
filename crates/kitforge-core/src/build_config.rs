//! Customer build input and the per-build context derived from it.

use crate::color;
use crate::error::{ForgeError, Result};
use crate::product::{self, ProductId};
use chrono::{DateTime, Datelike, Utc};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PRIMARY: &str = "#2563eb";
pub const DEFAULT_SECONDARY: &str = "#1e293b";
pub const DEFAULT_ACCENT: &str = "#f59e0b";

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Colors are hex strings; images are `data:<media-type>;base64,<payload>` URIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero: Option<String>,
}

impl Branding {
    pub fn has_colors(&self) -> bool {
        self.primary_color.is_some() || self.secondary_color.is_some() || self.accent_color.is_some()
    }

    pub fn has_images(&self) -> bool {
        self.logo.is_some() || self.favicon.is_some() || self.hero.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomService {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentOverrides {
    #[serde(default)]
    pub about_text: Option<String>,
    #[serde(default)]
    pub cta_text: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    /// Service id → replacement description.
    #[serde(default)]
    pub service_descriptions: BTreeMap<String, String>,
    /// When present, only these service ids are kept, in this order.
    #[serde(default)]
    pub selected_services: Option<Vec<String>>,
    #[serde(default)]
    pub custom_services: Vec<CustomService>,
}

impl ContentOverrides {
    pub fn is_empty(&self) -> bool {
        self.about_text.is_none()
            && self.cta_text.is_none()
            && self.tagline.is_none()
            && self.service_descriptions.is_empty()
            && self.selected_services.is_none()
            && self.custom_services.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    #[serde(default)]
    pub stripe_publishable_key: Option<String>,
    #[serde(default)]
    pub twilio_account_sid: Option<String>,
    #[serde(default)]
    pub twilio_auth_token: Option<String>,
    #[serde(default)]
    pub twilio_phone_number: Option<String>,
    #[serde(default)]
    pub google_maps_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// BuildConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub products: Vec<ProductId>,
    pub company: CompanyInfo,
    #[serde(default)]
    pub branding: Branding,
    /// Enabled feature ids per product.
    #[serde(default)]
    pub features: BTreeMap<ProductId, Vec<String>>,
    #[serde(default)]
    pub content: ContentOverrides,
    #[serde(default)]
    pub integrations: Integrations,
}

impl BuildConfig {
    pub fn new(company_name: impl Into<String>, products: Vec<ProductId>) -> Self {
        Self {
            products,
            company: CompanyInfo {
                name: company_name.into(),
                locale: default_locale(),
                timezone: default_timezone(),
                currency: default_currency(),
                ..Default::default()
            },
            branding: Branding::default(),
            features: BTreeMap::new(),
            content: ContentOverrides::default(),
            integrations: Integrations::default(),
        }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Reject configurations that must never reach a workspace.
    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "at least one product must be selected".into(),
            ));
        }
        if self.company.name.trim().is_empty() {
            return Err(ForgeError::InvalidConfig("company name is required".into()));
        }
        if slugify(&self.company.name).is_empty() {
            return Err(ForgeError::InvalidConfig(format!(
                "company name '{}' has no usable characters",
                self.company.name
            )));
        }
        for c in [
            &self.branding.primary_color,
            &self.branding.secondary_color,
            &self.branding.accent_color,
        ]
        .into_iter()
        .flatten()
        {
            color::parse_hex(c)?;
        }
        for product in self.features.keys() {
            if !self.products.contains(product) {
                return Err(ForgeError::InvalidConfig(format!(
                    "features listed for '{product}' which is not a selected product"
                )));
            }
        }
        Ok(())
    }

    /// Selected products, deduplicated, in canonical order.
    pub fn products(&self) -> Vec<ProductId> {
        product::canonical(&self.products)
    }

    pub fn has(&self, product: ProductId) -> bool {
        self.products.contains(&product)
    }

    pub fn enabled_features(&self, product: ProductId) -> &[String] {
        self.features
            .get(&product)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn company_slug(&self) -> String {
        slugify(&self.company.name)
    }

    pub fn primary_color(&self) -> &str {
        self.branding.primary_color.as_deref().unwrap_or(DEFAULT_PRIMARY)
    }

    pub fn secondary_color(&self) -> &str {
        self.branding
            .secondary_color
            .as_deref()
            .unwrap_or(DEFAULT_SECONDARY)
    }

    pub fn accent_color(&self) -> &str {
        self.branding.accent_color.as_deref().unwrap_or(DEFAULT_ACCENT)
    }

    /// Every literal token a template may reference, keyed without delimiters.
    pub fn token_map(&self, ctx: &BuildContext) -> BTreeMap<String, String> {
        let c = &self.company;
        let i = &self.integrations;
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let admin_email = c
            .email
            .clone()
            .unwrap_or_else(|| format!("admin@{}.local", self.company_slug()));

        let mut t = BTreeMap::new();
        t.insert("COMPANY_NAME".into(), c.name.trim().to_string());
        t.insert("COMPANY_SLUG".into(), self.company_slug());
        t.insert("COMPANY_EMAIL".into(), opt(&c.email));
        t.insert("COMPANY_PHONE".into(), opt(&c.phone));
        t.insert("COMPANY_ADDRESS".into(), opt(&c.address));
        t.insert("COMPANY_CITY".into(), opt(&c.city));
        t.insert("COMPANY_REGION".into(), opt(&c.region));
        t.insert("COMPANY_POSTAL_CODE".into(), opt(&c.postal_code));
        t.insert("COMPANY_WEBSITE".into(), opt(&c.website));
        t.insert("LOCALE".into(), c.locale.clone());
        t.insert("TIMEZONE".into(), c.timezone.clone());
        t.insert("CURRENCY".into(), c.currency.clone());
        t.insert("PRIMARY_COLOR".into(), self.primary_color().to_string());
        t.insert("SECONDARY_COLOR".into(), self.secondary_color().to_string());
        t.insert("ACCENT_COLOR".into(), self.accent_color().to_string());
        t.insert("ADMIN_EMAIL".into(), admin_email);
        t.insert(
            "DEFAULT_PASSWORD".into(),
            ctx.secrets.default_password.clone(),
        );
        t.insert("JWT_SECRET".into(), ctx.secrets.jwt_secret.clone());
        t.insert("SESSION_SECRET".into(), ctx.secrets.session_secret.clone());
        t.insert("STRIPE_SECRET_KEY".into(), opt(&i.stripe_secret_key));
        t.insert(
            "STRIPE_PUBLISHABLE_KEY".into(),
            opt(&i.stripe_publishable_key),
        );
        t.insert("TWILIO_ACCOUNT_SID".into(), opt(&i.twilio_account_sid));
        t.insert("TWILIO_AUTH_TOKEN".into(), opt(&i.twilio_auth_token));
        t.insert("TWILIO_PHONE_NUMBER".into(), opt(&i.twilio_phone_number));
        t.insert("GOOGLE_MAPS_API_KEY".into(), opt(&i.google_maps_api_key));
        t.insert("BUILD_ID".into(), ctx.build_id.clone());
        t.insert("GENERATED_AT".into(), ctx.generated_at.to_rfc3339());
        t.insert("YEAR".into(), ctx.generated_at.year().to_string());
        t
    }
}

/// Lowercase ASCII slug with single hyphens, e.g. `"Acme Roofing, LLC"` → `acme-roofing-llc`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

/// Values intentionally randomized per build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSecrets {
    pub default_password: String,
    pub jwt_secret: String,
    pub session_secret: String,
}

impl BuildSecrets {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let default_password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let mut jwt = [0u8; 32];
        rng.fill_bytes(&mut jwt);
        let mut session = [0u8; 32];
        rng.fill_bytes(&mut session);
        Self {
            default_password,
            jwt_secret: hex::encode(jwt),
            session_secret: hex::encode(session),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildContext {
    pub build_id: String,
    pub secrets: BuildSecrets,
    pub generated_at: DateTime<Utc>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self {
            build_id: uuid::Uuid::new_v4().to_string(),
            secrets: BuildSecrets::generate(),
            generated_at: Utc::now(),
        }
    }

    /// Fresh secrets and timestamp for an existing build id.
    pub fn for_build(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            ..Self::new()
        }
    }

    /// First eight characters of the build id, used in file names.
    pub fn short_id(&self) -> &str {
        let end = self.build_id.len().min(8);
        &self.build_id[..end]
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}
