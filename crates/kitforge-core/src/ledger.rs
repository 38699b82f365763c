//! Persistent records of generated builds and tenants, stored in redb.
//!
//! # Table design
//!
//! Two tables keyed by id string with JSON-encoded values:
//! `builds` (one [`GeneratedBuild`] per archive) and `tenants` (one [`Tenant`]
//! per onboarded company). Every tenant status transition is a
//! read-modify-write inside a single write transaction, so two callers racing
//! on the same tenant serialize on redb's writer lock and the loser observes
//! the winner's status.

use crate::build_config::BuildConfig;
use crate::error::{ForgeError, Result};
use crate::product::ProductId;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");
const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Deploy events kept per tenant; older entries are dropped.
const HISTORY_LIMIT: usize = 50;

fn db_err(e: impl fmt::Display) -> ForgeError {
    ForgeError::Ledger(e.to_string())
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Object,
    Local,
}

impl StorageBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackendKind::Object => "object",
            StorageBackendKind::Local => "local",
        }
    }
}

impl fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageBackendKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "object" | "s3" => Ok(StorageBackendKind::Object),
            "local" => Ok(StorageBackendKind::Local),
            _ => Err(ForgeError::InvalidConfig(format!(
                "unknown storage backend '{s}' (expected object or local)"
            ))),
        }
    }
}

/// Where an archive lives: an object key or an absolute local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHandle {
    pub backend: StorageBackendKind,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedBuild {
    pub id: String,
    pub tenant_id: String,
    pub products: Vec<ProductId>,
    #[serde(default)]
    pub features: BTreeMap<ProductId, Vec<String>>,
    pub archive_filename: String,
    pub product_slug: String,
    pub storage: StorageHandle,
    pub sha256: String,
    pub size_bytes: u64,
    /// Input snapshot used to regenerate the archive.
    pub config: BuildConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Generated,
    Deploying,
    Deployed,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Generated => "generated",
            TenantStatus::Deploying => "deploying",
            TenantStatus::Deployed => "deployed",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a remote cloud resource provisioned for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Backend,
    Frontend,
    Site,
    Database,
}

impl ServiceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceRole::Backend => "backend",
            ServiceRole::Frontend => "frontend",
            ServiceRole::Site => "site",
            ServiceRole::Database => "database",
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingLink {
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployedUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl DeployedUrls {
    pub fn get(&self, role: ServiceRole) -> Option<&str> {
        match role {
            ServiceRole::Backend => self.backend.as_deref(),
            ServiceRole::Frontend => self.frontend.as_deref(),
            ServiceRole::Site => self.site.as_deref(),
            ServiceRole::Database => None,
        }
    }

    pub fn set(&mut self, role: ServiceRole, url: Option<String>) {
        match role {
            ServiceRole::Backend => self.backend = url,
            ServiceRole::Frontend => self.frontend = url,
            ServiceRole::Site => self.site = url,
            ServiceRole::Database => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    Deploy,
    Redeploy,
    Rollback,
}

impl DeployAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployAction::Deploy => "deploy",
            DeployAction::Redeploy => "redeploy",
            DeployAction::Rollback => "rollback",
        }
    }
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    Started,
    Succeeded,
    Failed,
    Cancelled,
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub at: DateTime<Utc>,
    pub action: DeployAction,
    pub outcome: DeployOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub company_name: String,
    pub status: TenantStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<BillingLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_build_id: Option<String>,
    #[serde(default)]
    pub urls: DeployedUrls,
    /// Remote service id per role; empty until the first successful deploy.
    #[serde(default)]
    pub services: BTreeMap<ServiceRole, String>,
    /// Resources created by a first deploy that has not completed. The next
    /// deploy adopts them instead of creating duplicates.
    #[serde(default, skip_serializing_if = "DeployedState::is_empty")]
    pub pending: DeployedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_action: Option<DeployAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub deploy_history: Vec<DeployEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, company_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            company_name: company_name.into(),
            status: TenantStatus::Generated,
            billing: None,
            latest_build_id: None,
            urls: DeployedUrls::default(),
            services: BTreeMap::new(),
            pending: DeployedState::default(),
            repository: None,
            active_job: None,
            active_action: None,
            last_error: None,
            deploy_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deployed(&self) -> bool {
        !self.services.is_empty()
    }

    fn record(&mut self, action: DeployAction, outcome: DeployOutcome, job_id: Option<&str>, detail: Option<String>) {
        let now = Utc::now();
        self.deploy_history.push(DeployEvent {
            at: now,
            action,
            outcome,
            job_id: job_id.map(str::to_string),
            detail,
        });
        if self.deploy_history.len() > HISTORY_LIMIT {
            let excess = self.deploy_history.len() - HISTORY_LIMIT;
            self.deploy_history.drain(..excess);
        }
        self.updated_at = now;
    }

    /// Move out of `deploying` and clear the job bookkeeping.
    fn settle(&mut self, status: TenantStatus, outcome: DeployOutcome, job_id: Option<&str>, detail: Option<String>) {
        let action = self.active_action.take().unwrap_or(DeployAction::Deploy);
        self.status = status;
        self.active_job = None;
        self.record(action, outcome, job_id, detail);
    }
}

/// Remote resources known for a tenant: the result of a successful
/// provisioning run, or the part of one that got done before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployedState {
    #[serde(default)]
    pub urls: DeployedUrls,
    #[serde(default)]
    pub services: BTreeMap<ServiceRole, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRef>,
}

impl DeployedState {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.repository.is_none()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    db: Database,
}

impl Ledger {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(BUILDS).map_err(db_err)?;
        wt.open_table(TENANTS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -- builds -------------------------------------------------------------

    /// Insert a build and create or refresh its tenant in one transaction.
    pub fn record_build(&self, build: &GeneratedBuild) -> Result<Tenant> {
        let value = serde_json::to_vec(build)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let tenant = {
            let mut builds = wt.open_table(BUILDS).map_err(db_err)?;
            builds
                .insert(build.id.as_str(), value.as_slice())
                .map_err(db_err)?;

            let mut tenants = wt.open_table(TENANTS).map_err(db_err)?;
            let existing = read_json::<Tenant>(&tenants, &build.tenant_id)?;
            let mut tenant = existing.unwrap_or_else(|| {
                info!(tenant_id = %build.tenant_id, "tenant created");
                Tenant::new(&build.tenant_id, build.config.company.name.trim())
            });
            tenant.latest_build_id = Some(build.id.clone());
            tenant.updated_at = Utc::now();
            write_json(&mut tenants, &tenant.id, &tenant)?;
            tenant
        };
        wt.commit().map_err(db_err)?;
        Ok(tenant)
    }

    pub fn get_build(&self, id: &str) -> Result<GeneratedBuild> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BUILDS).map_err(db_err)?;
        read_json(&table, id)?.ok_or_else(|| ForgeError::BuildNotFound(id.to_string()))
    }

    /// Builds newest first, optionally restricted to one tenant.
    pub fn list_builds(&self, tenant_id: Option<&str>) -> Result<Vec<GeneratedBuild>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BUILDS).map_err(db_err)?;
        let mut out: Vec<GeneratedBuild> = scan(&table)?;
        if let Some(t) = tenant_id {
            out.retain(|b| b.tenant_id == t);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Point a build at a regenerated archive. Returns the previous handle so
    /// the caller can discard it.
    pub fn update_build_storage(
        &self,
        id: &str,
        storage: StorageHandle,
        sha256: &str,
        size_bytes: u64,
    ) -> Result<StorageHandle> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let previous = {
            let mut table = wt.open_table(BUILDS).map_err(db_err)?;
            let mut build: GeneratedBuild =
                read_json(&table, id)?.ok_or_else(|| ForgeError::BuildNotFound(id.to_string()))?;
            let previous = std::mem::replace(&mut build.storage, storage);
            build.sha256 = sha256.to_string();
            build.size_bytes = size_bytes;
            build.updated_at = Utc::now();
            write_json(&mut table, id, &build)?;
            previous
        };
        wt.commit().map_err(db_err)?;
        Ok(previous)
    }

    /// Remove a build record. The tenant's latest build falls back to its
    /// newest remaining build.
    pub fn delete_build(&self, id: &str) -> Result<GeneratedBuild> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut builds = wt.open_table(BUILDS).map_err(db_err)?;
            let removed: GeneratedBuild =
                read_json(&builds, id)?.ok_or_else(|| ForgeError::BuildNotFound(id.to_string()))?;
            builds.remove(id).map_err(db_err)?;

            let mut tenants = wt.open_table(TENANTS).map_err(db_err)?;
            if let Some(mut tenant) = read_json::<Tenant>(&tenants, &removed.tenant_id)? {
                if tenant.latest_build_id.as_deref() == Some(id) {
                    let remaining: Vec<GeneratedBuild> = scan(&builds)?;
                    tenant.latest_build_id = remaining
                        .into_iter()
                        .filter(|b| b.tenant_id == tenant.id)
                        .max_by_key(|b| b.created_at)
                        .map(|b| b.id);
                    tenant.updated_at = Utc::now();
                    write_json(&mut tenants, &tenant.id, &tenant)?;
                }
            }
            removed
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    // -- tenants ------------------------------------------------------------

    pub fn get_tenant(&self, id: &str) -> Result<Tenant> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TENANTS).map_err(db_err)?;
        read_json(&table, id)?.ok_or_else(|| ForgeError::TenantNotFound(id.to_string()))
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TENANTS).map_err(db_err)?;
        let mut out: Vec<Tenant> = scan(&table)?;
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    pub fn set_billing(&self, id: &str, billing: BillingLink) -> Result<Tenant> {
        self.update_tenant(id, |t| {
            t.billing = Some(billing);
            t.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Atomically move a tenant into `deploying` for `action`.
    ///
    /// Rejects with `DeployInProgress` while another job runs. A first deploy
    /// needs a build (`BuildNotFound`) and no recorded services
    /// (`AlreadyDeployed`); redeploy and rollback need recorded services
    /// (`NotDeployed`).
    pub fn begin_deploy(&self, id: &str, action: DeployAction, job_id: &str) -> Result<Tenant> {
        self.update_tenant(id, |t| {
            if t.status == TenantStatus::Deploying {
                return Err(ForgeError::DeployInProgress(t.id.clone()));
            }
            match action {
                DeployAction::Deploy => {
                    if t.is_deployed() {
                        return Err(ForgeError::AlreadyDeployed(t.id.clone()));
                    }
                    if t.latest_build_id.is_none() {
                        return Err(ForgeError::BuildNotFound(format!("no build for tenant {}", t.id)));
                    }
                }
                DeployAction::Redeploy | DeployAction::Rollback => {
                    if !t.is_deployed() {
                        return Err(ForgeError::NotDeployed(t.id.clone()));
                    }
                }
            }
            t.status = TenantStatus::Deploying;
            t.active_job = Some(job_id.to_string());
            t.active_action = Some(action);
            t.last_error = None;
            t.record(action, DeployOutcome::Started, Some(job_id), None);
            Ok(())
        })
    }

    /// Terminal success write. `state` replaces the recorded URLs and services
    /// when present and clears the pending set it adopted. Returns `false`
    /// without writing when `job_id` is no longer the tenant's active job.
    pub fn complete_deploy(&self, id: &str, job_id: &str, state: Option<DeployedState>) -> Result<bool> {
        let mut applied = false;
        self.update_tenant(id, |t| {
            if t.active_job.as_deref() != Some(job_id) {
                return Ok(());
            }
            if let Some(state) = state {
                t.urls = state.urls;
                t.services = state.services;
                if state.repository.is_some() {
                    t.repository = state.repository;
                }
                t.pending = DeployedState::default();
            }
            t.last_error = None;
            t.settle(TenantStatus::Deployed, DeployOutcome::Succeeded, Some(job_id), None);
            applied = true;
            Ok(())
        })?;
        Ok(applied)
    }

    /// Terminal failure write: back to `generated` with the error recorded.
    /// Pending resources stay recorded for the next deploy. Returns `false`
    /// without writing when `job_id` is no longer active.
    pub fn fail_deploy(&self, id: &str, job_id: &str, error: &str) -> Result<bool> {
        let mut applied = false;
        self.update_tenant(id, |t| {
            if t.active_job.as_deref() != Some(job_id) {
                return Ok(());
            }
            t.last_error = Some(error.to_string());
            t.settle(
                TenantStatus::Generated,
                DeployOutcome::Failed,
                Some(job_id),
                Some(error.to_string()),
            );
            applied = true;
            Ok(())
        })?;
        Ok(applied)
    }

    /// Record a remote resource as soon as the platform has created it, so a
    /// deploy that stops halfway still leaves it on the tenant. Not gated on
    /// the active job: a resource that exists is always worth tracking.
    pub fn record_pending_service(
        &self,
        id: &str,
        role: ServiceRole,
        service_id: &str,
        url: Option<String>,
    ) -> Result<()> {
        self.update_tenant(id, |t| {
            if t.services.get(&role).is_some_and(|s| s != service_id) {
                warn!(tenant_id = %t.id, service = role.as_str(), service_id, "resource created beside a live service");
            }
            t.pending.services.insert(role, service_id.to_string());
            t.pending.urls.set(role, url);
            t.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(())
    }

    pub fn record_pending_repository(&self, id: &str, repo: RepositoryRef) -> Result<()> {
        self.update_tenant(id, |t| {
            t.pending.repository = Some(repo);
            t.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(())
    }

    /// Operator cancel: whatever job is active, the tenant returns to
    /// `generated`. Returns the cancelled job id.
    pub fn cancel_deploy(&self, id: &str) -> Result<Option<String>> {
        let mut cancelled = None;
        self.update_tenant(id, |t| {
            if t.status != TenantStatus::Deploying {
                return Err(ForgeError::InvalidTransition {
                    tenant: t.id.clone(),
                    from: t.status.to_string(),
                    to: TenantStatus::Generated.to_string(),
                });
            }
            cancelled = t.active_job.clone();
            t.last_error = Some("deployment cancelled".into());
            t.settle(
                TenantStatus::Generated,
                DeployOutcome::Cancelled,
                cancelled.as_deref(),
                None,
            );
            Ok(())
        })?;
        Ok(cancelled)
    }

    /// On startup, revert tenants left `deploying` for longer than `max_age`.
    /// Returns the number of tenants recovered.
    pub fn recover_stuck(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(db_err)?;
        let mut count = 0u32;
        for tenant in self.list_tenants()? {
            if tenant.status != TenantStatus::Deploying || tenant.updated_at >= cutoff {
                continue;
            }
            self.update_tenant(&tenant.id, |t| {
                if t.status == TenantStatus::Deploying {
                    let job = t.active_job.clone();
                    t.last_error = Some("deployment interrupted by restart".into());
                    t.settle(TenantStatus::Generated, DeployOutcome::Recovered, job.as_deref(), None);
                }
                Ok(())
            })?;
            warn!(tenant_id = %tenant.id, "recovered tenant stuck in deploying");
            count += 1;
        }
        Ok(count)
    }

    /// Read-modify-write of one tenant inside a single write transaction.
    /// An error from `f` aborts the transaction.
    fn update_tenant<F>(&self, id: &str, f: F) -> Result<Tenant>
    where
        F: FnOnce(&mut Tenant) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let tenant = {
            let mut table = wt.open_table(TENANTS).map_err(db_err)?;
            let mut tenant: Tenant =
                read_json(&table, id)?.ok_or_else(|| ForgeError::TenantNotFound(id.to_string()))?;
            f(&mut tenant)?;
            write_json(&mut table, id, &tenant)?;
            tenant
        };
        wt.commit().map_err(db_err)?;
        Ok(tenant)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>> {
    let Some(guard) = table.get(key).map_err(db_err)? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(guard.value()).map_err(db_err)?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

fn scan<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        out.push(serde_json::from_slice(v.value()).map_err(db_err)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
