use crate::error::{ForgeError, Result};
use crate::ledger::StorageBackendKind;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ForgeError::InvalidConfig(format!("unknown environment '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// S3-compatible endpoint override (MinIO, R2, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Lifetime of presigned download URLs.
    #[serde(default = "default_url_expiry")]
    pub url_expiry_secs: u64,
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Local
}

fn default_prefix() -> String {
    "builds".to_string()
}

fn default_url_expiry() -> u64 {
    3600
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: None,
            region: None,
            endpoint: None,
            prefix: default_prefix(),
            url_expiry_secs: default_url_expiry(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Organisation or user that owns generated repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_true")]
    pub private_repos: bool,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            api_url: default_github_api(),
            private_repos: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default = "default_render_api")]
    pub api_url: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    /// How long a deploy job waits for every service to report live.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_render_api() -> String {
    "https://api.render.com/v1".to_string()
}

fn default_region() -> String {
    "oregon".to_string()
}

fn default_plan() -> String {
    "starter".to_string()
}

fn default_health_timeout() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            owner_id: None,
            api_url: default_render_api(),
            region: default_region(),
            plan: default_plan(),
            health_timeout_secs: default_health_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub github: GithubSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub server: ServerSettings,
    /// Tenants left `deploying` longer than this are reverted at startup.
    #[serde(default = "default_stuck_after")]
    pub stuck_deploy_secs: u64,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from(paths::TEMPLATES_DIR)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(paths::DATA_DIR)
}

fn default_stuck_after() -> u64 {
    1800
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            templates_dir: default_templates_dir(),
            data_dir: default_data_dir(),
            storage: StorageSettings::default(),
            github: GithubSettings::default(),
            render: RenderSettings::default(),
            server: ServerSettings::default(),
            stuck_deploy_secs: default_stuck_after(),
        }
    }
}

impl Settings {
    /// Load `<root>/kitforge.yaml` (defaults when absent), apply environment
    /// overrides and resolve relative directories against `root`.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_with(root, |key| std::env::var(key).ok())
    }

    /// [`Settings::load`] with an injectable environment lookup.
    pub fn load_with(root: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = paths::config_path(root);
        let mut settings = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&data)?
        } else {
            Settings::default()
        };
        settings.apply_env(env)?;
        settings.templates_dir = paths::resolve(root, &settings.templates_dir);
        settings.data_dir = paths::resolve(root, &settings.data_dir);
        Ok(settings)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("KITFORGE_ENV") {
            self.environment = v.parse()?;
        }
        if let Some(v) = get("KITFORGE_TEMPLATES") {
            self.templates_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KITFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KITFORGE_STORAGE") {
            self.storage.backend = v.parse()?;
        }
        if let Some(v) = get("KITFORGE_S3_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = get("KITFORGE_S3_REGION") {
            self.storage.region = Some(v);
        }
        if let Some(v) = get("KITFORGE_S3_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = get("KITFORGE_S3_PREFIX") {
            self.storage.prefix = v;
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("GITHUB_OWNER") {
            self.github.owner = Some(v);
        }
        if let Some(v) = get("RENDER_API_KEY") {
            self.render.api_key = Some(v);
        }
        if let Some(v) = get("RENDER_OWNER_ID") {
            self.render.owner_id = Some(v);
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        paths::ledger_path(&self.data_dir)
    }

    pub fn work_root(&self) -> PathBuf {
        paths::work_root(&self.data_dir)
    }

    pub fn archives_dir(&self) -> PathBuf {
        paths::archives_dir(&self.data_dir)
    }

    /// Whether both deployment integrations have credentials.
    pub fn deploy_configured(&self) -> bool {
        self.github.token.is_some()
            && self.github.owner.is_some()
            && self.render.api_key.is_some()
            && self.render.owner_id.is_some()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        // 1. Local archives are never served in production.
        if self.environment.is_production() && self.storage.backend == StorageBackendKind::Local {
            push(
                WarnLevel::Error,
                "storage.backend is 'local' but environment is production; configure object storage".into(),
            );
        }

        // 2. Object storage needs a bucket.
        if self.storage.backend == StorageBackendKind::Object && self.storage.bucket.is_none() {
            push(
                WarnLevel::Error,
                "storage.backend is 'object' but no bucket is set (KITFORGE_S3_BUCKET)".into(),
            );
        }

        // 3. Templates must exist for any build to succeed.
        if !self.templates_dir.is_dir() {
            push(
                WarnLevel::Warning,
                format!("templates directory {} does not exist", self.templates_dir.display()),
            );
        }

        // 4. Deployment credentials.
        if self.github.token.is_none() || self.github.owner.is_none() {
            push(
                WarnLevel::Warning,
                "GITHUB_TOKEN/GITHUB_OWNER not set; deployments are disabled".into(),
            );
        }
        if self.render.api_key.is_none() || self.render.owner_id.is_none() {
            push(
                WarnLevel::Warning,
                "RENDER_API_KEY/RENDER_OWNER_ID not set; deployments are disabled".into(),
            );
        }

        // 5. Polling slower than the timeout never observes a healthy service.
        if self.render.poll_interval_secs == 0
            || self.render.poll_interval_secs > self.render.health_timeout_secs
        {
            push(
                WarnLevel::Warning,
                format!(
                    "render.poll_interval_secs ({}) must be between 1 and health_timeout_secs ({})",
                    self.render.poll_interval_secs, self.render.health_timeout_secs
                ),
            );
        }
        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}
