//! Branding assets, stylesheet colors and wizard copy merged into a rendered
//! product. Each step is a no-op when the build config carries nothing for it.

use crate::build_config::{slugify, BuildConfig, Branding, ContentOverrides};
use crate::color;
use crate::error::{ForgeError, Result};
use crate::io;
use crate::product::ProductId;
use base64::Engine;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Percent shift used for the `-light` / `-dark` custom properties.
const SHADE_PERCENT: i32 = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectReport {
    pub assets: Vec<PathBuf>,
    pub stylesheets: usize,
    pub content_merged: bool,
}

/// Run every injection step for one product.
pub fn inject(product: ProductId, product_dir: &Path, config: &BuildConfig) -> Result<InjectReport> {
    Ok(InjectReport {
        assets: write_branding(product, product_dir, &config.branding)?,
        stylesheets: inject_colors(product_dir, &config.branding)?,
        content_merged: merge_content(product, product_dir, &config.content)?,
    })
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAsset {
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

fn extension_for(media_type: &str) -> Option<&'static str> {
    Some(match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/avif" => "avif",
        _ => return None,
    })
}

/// Decode a `data:<media-type>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<DecodedAsset> {
    let invalid = |why: &str| ForgeError::InvalidAsset(why.to_string());
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| invalid("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("data URI has no payload"))?;
    let media_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("only base64 data URIs are supported"))?
        .split(';')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let extension = extension_for(&media_type)
        .ok_or_else(|| ForgeError::InvalidAsset(format!("unsupported media type '{media_type}'")))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ForgeError::InvalidAsset(format!("bad base64 payload: {e}")))?;
    if bytes.is_empty() {
        return Err(invalid("empty image payload"));
    }
    Ok(DecodedAsset {
        media_type,
        bytes,
        extension,
    })
}

/// Write decoded logo/favicon/hero images into the product's asset dir and
/// point the settings record at them. Returns paths relative to `product_dir`.
pub fn write_branding(
    product: ProductId,
    product_dir: &Path,
    branding: &Branding,
) -> Result<Vec<PathBuf>> {
    if !branding.has_images() {
        return Ok(Vec::new());
    }
    let slots = [
        ("logo", "logo", &branding.logo),
        ("favicon", "favicon", &branding.favicon),
        ("hero", "heroImage", &branding.hero),
    ];

    let mut written = Vec::new();
    let mut settings_updates = BTreeMap::new();
    for (name, key, uri) in slots {
        let Some(uri) = uri else { continue };
        let asset = decode_data_uri(uri)?;
        let file_name = format!("{name}.{}", asset.extension);
        let rel = Path::new(product.asset_dir()).join(&file_name);
        io::atomic_write(&product_dir.join(&rel), &asset.bytes)?;
        settings_updates.insert(
            key,
            format!("{}/{file_name}", product.asset_url_prefix()),
        );
        debug!(product = %product, asset = %rel.display(), bytes = asset.bytes.len(), "branding image written");
        written.push(rel);
    }

    let settings_path = product_dir.join(product.settings_file());
    let mut settings = match read_json(&settings_path)? {
        Some(Value::Object(map)) => map,
        None => Map::new(),
        Some(_) => {
            warn!(
                product = %product,
                path = product.settings_file(),
                "settings file is not a JSON object, leaving asset paths unset"
            );
            return Ok(written);
        }
    };
    for (key, url) in settings_updates {
        settings.insert(key.to_string(), Value::String(url));
    }
    write_json(&settings_path, &Value::Object(settings))?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

static DECLARATION_RE: OnceLock<Regex> = OnceLock::new();

fn declaration_re() -> &'static Regex {
    DECLARATION_RE.get_or_init(|| {
        Regex::new(r"(--[A-Za-z][A-Za-z0-9-]*)(\s*:\s*)([^;}\n]+)").expect("valid declaration regex")
    })
}

/// Custom property name → value for every color the branding supplies.
pub fn color_vocabulary(branding: &Branding) -> Result<BTreeMap<&'static str, String>> {
    let mut vocab = BTreeMap::new();
    if let Some(primary) = &branding.primary_color {
        let base = color::normalize(primary)?;
        for name in ["--primary", "--color-primary", "--primary-color", "--brand", "--link-color"] {
            vocab.insert(name, base.clone());
        }
        vocab.insert("--primary-light", color::lighten(&base, SHADE_PERCENT)?);
        vocab.insert("--primary-dark", color::lighten(&base, -SHADE_PERCENT)?);
    }
    if let Some(secondary) = &branding.secondary_color {
        let base = color::normalize(secondary)?;
        for name in ["--secondary", "--color-secondary", "--secondary-color"] {
            vocab.insert(name, base.clone());
        }
        vocab.insert("--secondary-light", color::lighten(&base, SHADE_PERCENT)?);
        vocab.insert("--secondary-dark", color::lighten(&base, -SHADE_PERCENT)?);
    }
    if let Some(accent) = &branding.accent_color {
        let base = color::normalize(accent)?;
        for name in ["--accent", "--color-accent", "--accent-color"] {
            vocab.insert(name, base.clone());
        }
        vocab.insert("--accent-light", color::lighten(&base, SHADE_PERCENT)?);
    }
    Ok(vocab)
}

/// Rewrite vocabulary declarations in one stylesheet's text.
pub fn rewrite_stylesheet(css: &str, vocab: &BTreeMap<&'static str, String>) -> Option<String> {
    let mut changed = false;
    let out = declaration_re().replace_all(css, |caps: &regex::Captures<'_>| {
        match vocab.get(&caps[1]) {
            Some(value) if caps[3].trim() != value => {
                changed = true;
                format!("{}{}{}", &caps[1], &caps[2], value)
            }
            _ => caps[0].to_string(),
        }
    });
    changed.then(|| out.into_owned())
}

/// Apply branding colors to every `.css`/`.scss` file. Returns the number of
/// files rewritten.
pub fn inject_colors(product_dir: &Path, branding: &Branding) -> Result<usize> {
    if !branding.has_colors() {
        return Ok(0);
    }
    let vocab = color_vocabulary(branding)?;
    let mut rewritten = 0;
    let walker = WalkDir::new(product_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules");
    for entry in walker {
        let entry = entry?;
        let is_stylesheet = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("css") || e.eq_ignore_ascii_case("scss"));
        if !entry.file_type().is_file() || !is_stylesheet {
            continue;
        }
        let Ok(css) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some(updated) = rewrite_stylesheet(&css, &vocab) {
            std::fs::write(entry.path(), updated)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Merge wizard copy into the product's content and service files. Returns
/// whether anything was written.
pub fn merge_content(
    product: ProductId,
    product_dir: &Path,
    overrides: &ContentOverrides,
) -> Result<bool> {
    if overrides.is_empty() {
        return Ok(false);
    }
    let mut merged = false;

    if let Some(rel) = product.content_file() {
        let path = product_dir.join(rel);
        if let Some(Value::Object(mut content)) = read_json(&path)? {
            let fields = [
                ("aboutText", &overrides.about_text),
                ("ctaText", &overrides.cta_text),
                ("tagline", &overrides.tagline),
            ];
            let mut touched = false;
            for (key, value) in fields {
                if let Some(v) = value {
                    content.insert(key.to_string(), Value::String(v.clone()));
                    touched = true;
                }
            }
            if touched {
                write_json(&path, &Value::Object(content))?;
                merged = true;
            }
        }
    }

    if let Some(rel) = product.services_file() {
        let path = product_dir.join(rel);
        if let Some(mut doc) = read_json(&path)? {
            let services = match &mut doc {
                Value::Array(items) => Some(items),
                Value::Object(map) => match map.get_mut("services") {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                },
                _ => None,
            };
            match services {
                Some(items) => {
                    merge_services(items, overrides);
                    write_json(&path, &doc)?;
                    merged = true;
                }
                None => warn!(product = %product, path = rel, "services file has no service list"),
            }
        }
    }
    Ok(merged)
}

fn service_id(service: &Value) -> Option<&str> {
    service.get("id").and_then(Value::as_str)
}

fn merge_services(items: &mut Vec<Value>, overrides: &ContentOverrides) {
    for item in items.iter_mut() {
        let Some(id) = service_id(item).map(str::to_string) else {
            continue;
        };
        if let (Some(desc), Some(obj)) = (overrides.service_descriptions.get(&id), item.as_object_mut()) {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
    }

    if let Some(selected) = &overrides.selected_services {
        let mut by_id: BTreeMap<String, Value> = items
            .drain(..)
            .filter_map(|v| service_id(&v).map(str::to_string).map(|id| (id, v)))
            .collect();
        *items = selected.iter().filter_map(|id| by_id.remove(id)).collect();
    }

    for custom in &overrides.custom_services {
        let base = slugify(&custom.name);
        let mut id = base.clone();
        let mut n = 2;
        while items.iter().any(|v| service_id(v) == Some(id.as_str())) {
            id = format!("{base}-{n}");
            n += 1;
        }
        let mut obj = Map::new();
        obj.insert("id".into(), Value::String(id));
        obj.insert("name".into(), Value::String(custom.name.clone()));
        if let Some(d) = &custom.description {
            obj.insert("description".into(), Value::String(d.clone()));
        }
        if let Some(p) = &custom.price {
            obj.insert("price".into(), Value::String(p.clone()));
        }
        obj.insert("custom".into(), Value::Bool(true));
        items.push(Value::Object(obj));
    }
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut data = serde_json::to_string_pretty(value)?;
    data.push('\n');
    io::atomic_write(path, data.as_bytes())
}
