use kitforge_core::ForgeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The archive stays on local disk at `path` so it can be retried.
    #[error("upload of {} failed: {reason}", path.display())]
    Upload { path: PathBuf, reason: String },

    #[error("archive not found: {0}")]
    NotFound(String),

    #[error("storage misconfigured: {0}")]
    Config(String),

    #[error("handle belongs to the {found} backend, not {expected}")]
    WrongBackend { expected: String, found: String },

    #[error("object storage error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("background task failed: {0}")]
    Join(String),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{service} API returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected {service} response: {reason}")]
    Response {
        service: &'static str,
        reason: String,
    },

    #[error("deployment is not configured: {0}")]
    NotConfigured(String),

    #[error("could not unpack archive: {0}")]
    Unpack(String),

    #[error("services not live after {waited_secs}s: {}", pending.join(", "))]
    HealthTimeout { waited_secs: u64, pending: Vec<String> },

    #[error("service {service} failed: {status}")]
    ServiceFailed { service: String, status: String },

    #[error("deployment job panicked: {0}")]
    Panicked(String),

    #[error("background task failed: {0}")]
    Join(String),
}

pub type DeployResult<T> = std::result::Result<T, DeployError>;

impl From<zip::result::ZipError> for DeployError {
    fn from(e: zip::result::ZipError) -> Self {
        DeployError::Unpack(e.to_string())
    }
}

impl DeployError {
    /// The core error underneath, if any, so callers can reuse its class.
    pub fn as_forge(&self) -> Option<&ForgeError> {
        match self {
            DeployError::Forge(e) => Some(e),
            _ => None,
        }
    }
}
