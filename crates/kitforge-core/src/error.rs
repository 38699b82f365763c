use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("invalid build config: {0}")]
    InvalidConfig(String),

    #[error("unknown product '{0}': expected one of site, admin, crm")]
    UnknownProduct(String),

    #[error("feature '{feature}' is not declared in the {product} manifest")]
    UnknownFeature { product: String, feature: String },

    #[error("template for {product} not found at {}", path.display())]
    TemplateMissing { product: String, path: PathBuf },

    #[error("invalid feature manifest for {product}: {reason}")]
    InvalidManifest { product: String, reason: String },

    #[error("invalid hex color '{0}'")]
    InvalidColor(String),

    #[error("invalid embedded asset: {0}")]
    InvalidAsset(String),

    #[error("workspace already exists: {}", .0.display())]
    WorkspaceExists(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("build not found: {0}")]
    BuildNotFound(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("invalid tenant transition from {from} to {to} for '{tenant}'")]
    InvalidTransition {
        tenant: String,
        from: String,
        to: String,
    },

    #[error("a deployment is already running for tenant '{0}'")]
    DeployInProgress(String),

    #[error("tenant '{0}' has no deployed services")]
    NotDeployed(String),

    #[error("tenant '{0}' is already deployed; use redeploy")]
    AlreadyDeployed(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;

/// Coarse failure category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any workspace exists; fix the input and retry.
    Configuration,
    /// Template tree or manifest problem on the server side.
    Template,
    /// Feature selection does not match the manifest.
    Resolver,
    Assembly,
    Storage,
    Ledger,
}

impl ForgeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ForgeError::InvalidConfig(_)
            | ForgeError::UnknownProduct(_)
            | ForgeError::InvalidColor(_)
            | ForgeError::InvalidAsset(_) => ErrorClass::Configuration,
            ForgeError::UnknownFeature { .. } => ErrorClass::Resolver,
            ForgeError::TemplateMissing { .. } | ForgeError::InvalidManifest { .. } => {
                ErrorClass::Template
            }
            ForgeError::WorkspaceExists(_) | ForgeError::Archive(_) => ErrorClass::Assembly,
            ForgeError::BuildNotFound(_)
            | ForgeError::TenantNotFound(_)
            | ForgeError::InvalidTransition { .. }
            | ForgeError::DeployInProgress(_)
            | ForgeError::NotDeployed(_)
            | ForgeError::AlreadyDeployed(_)
            | ForgeError::Ledger(_) => ErrorClass::Ledger,
            ForgeError::Io(_) | ForgeError::Yaml(_) | ForgeError::Json(_) => ErrorClass::Assembly,
        }
    }

    /// True when the same request may succeed on retry without changes.
    pub fn retry_safe(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Template | ErrorClass::Assembly | ErrorClass::Storage
        )
    }
}

impl From<zip::result::ZipError> for ForgeError {
    fn from(e: zip::result::ZipError) -> Self {
        ForgeError::Archive(e.to_string())
    }
}

impl From<walkdir::Error> for ForgeError {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => ForgeError::Io(io),
            None => ForgeError::Io(std::io::Error::other("filesystem loop in template tree")),
        }
    }
}
