//! Seams between the deployment orchestrator and the outside world.
//!
//! [`SourceControl`] hosts the generated code; [`CloudPlatform`] runs it. The
//! orchestrator only talks to these traits, so tests swap in recording fakes.

use crate::error::DeployResult;
use async_trait::async_trait;
use kitforge_core::ledger::RepositoryRef;
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Source control ───────────────────────────────────────────────────────────

/// One file of the unpacked archive, path relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub executable: bool,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Create (or reuse) a repository with an initial commit on `main`.
    async fn create_repository(&self, name: &str, description: &str) -> DeployResult<RepositoryRef>;

    /// Replace the contents of `main` with `files` in a single commit.
    /// Returns the new commit sha.
    async fn push_files(
        &self,
        repo: &RepositoryRef,
        files: &[RepoFile],
        message: &str,
    ) -> DeployResult<String>;
}

// ─── Cloud platform ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    WebService,
    StaticSite,
}

/// Everything needed to create one hosted service from a repository
/// subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub kind: ServiceKind,
    pub repo_url: String,
    pub branch: String,
    pub root_dir: String,
    pub build_command: String,
    /// Web services only.
    pub start_command: Option<String>,
    /// Static sites only, relative to `root_dir`.
    pub publish_path: Option<String>,
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedService {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub name: String,
}

/// Health of a hosted service as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Live,
    Deploying,
    Failed,
    Suspended,
    Unknown,
}

impl ServiceHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceHealth::Live => "live",
            ServiceHealth::Deploying => "deploying",
            ServiceHealth::Failed => "failed",
            ServiceHealth::Suspended => "suspended",
            ServiceHealth::Unknown => "unknown",
        }
    }

    /// Map a platform deploy status onto the coarse health states.
    pub fn from_deploy_status(status: &str) -> Self {
        match status {
            "live" => ServiceHealth::Live,
            "created" | "queued" | "build_in_progress" | "update_in_progress"
            | "pre_deploy_in_progress" => ServiceHealth::Deploying,
            "build_failed" | "update_failed" | "pre_deploy_failed" | "canceled" => {
                ServiceHealth::Failed
            }
            _ => ServiceHealth::Unknown,
        }
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRecord {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait CloudPlatform: Send + Sync {
    /// Returns the database id.
    async fn create_database(&self, spec: &DatabaseSpec) -> DeployResult<String>;

    /// Connection string usable from services on the same platform.
    async fn database_connection(&self, database_id: &str) -> DeployResult<String>;

    async fn create_service(&self, spec: &ServiceSpec) -> DeployResult<ProvisionedService>;

    async fn set_env_vars(&self, service_id: &str, vars: &[EnvVar]) -> DeployResult<()>;

    async fn service_health(&self, service_id: &str) -> DeployResult<ServiceHealth>;

    /// Returns the new deploy id.
    async fn trigger_deploy(&self, service_id: &str) -> DeployResult<String>;

    /// Most recent first.
    async fn list_deploys(&self, service_id: &str, limit: u32) -> DeployResult<Vec<DeployRecord>>;

    async fn rollback(&self, service_id: &str, deploy_id: &str) -> DeployResult<String>;
}
