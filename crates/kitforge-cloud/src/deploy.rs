//! Deployment orchestration.
//!
//! A [`Deployer`] turns a tenant's latest build into running services. The
//! caller-visible part (`generated|deployed → deploying`) is one atomic ledger
//! write; everything else runs as a tracked background job whose only output
//! is the terminal ledger write. A supervisor task awaits the job's
//! `JoinHandle`, so an error, a panic or an abort all end in exactly one
//! `complete_deploy`/`fail_deploy` call. Stale jobs cannot clobber newer state:
//! the ledger ignores terminal writes from a job id that is no longer active.
//!
//! Every repository, database and service is written to the tenant's
//! `pending` set the moment it exists. A first deploy that fails halfway
//! leaves that record behind, and the next deploy adopts it rather than
//! provisioning a second copy.

use crate::error::{DeployError, DeployResult};
use crate::github::GithubClient;
use crate::ports::{
    CloudPlatform, DatabaseSpec, DeployRecord, EnvVar, ProvisionedService, RepoFile,
    ServiceHealth, ServiceKind, ServiceSpec, SourceControl,
};
use crate::render::RenderClient;
use crate::storage::ArchiveStorage;
use kitforge_core::assemble::{self, Layout};
use kitforge_core::build_config::{BuildSecrets, Integrations};
use kitforge_core::config::Settings;
use kitforge_core::ledger::{
    DeployAction, DeployedState, DeployedUrls, GeneratedBuild, RepositoryRef, ServiceRole, Tenant,
    TenantStatus,
};
use kitforge_core::{Ledger, ProductId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

const BRANCH: &str = "main";
/// Deploy records inspected when looking for a rollback target.
const ROLLBACK_SEARCH: u32 = 10;

// ─── Options and payloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DeployOptions {
    /// Upper bound on waiting for every service to report live.
    pub health_timeout: Duration,
    pub poll_interval: Duration,
}

impl DeployOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            health_timeout: Duration::from_secs(settings.render.health_timeout_secs),
            poll_interval: Duration::from_secs(settings.render.poll_interval_secs.max(1)),
        }
    }
}

/// Immediate answer to a deploy, redeploy or rollback request.
#[derive(Debug, Clone, Serialize)]
pub struct DeployAck {
    pub tenant_id: String,
    pub status: TenantStatus,
    pub action: DeployAction,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelAck {
    pub tenant_id: String,
    pub status: TenantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_job: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NotDeployed,
    Deploying,
    Live,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub role: ServiceRole,
    pub service_id: String,
    pub health: ServiceHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployStatus {
    pub tenant_id: String,
    pub status: OverallStatus,
    pub tenant_status: TenantStatus,
    pub services: Vec<ServiceStatus>,
    pub urls: DeployedUrls,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ─── Deployer ─────────────────────────────────────────────────────────────────

struct TrackedJob {
    job_id: String,
    abort: AbortHandle,
}

struct Inner {
    ledger: Arc<Ledger>,
    storage: Arc<dyn ArchiveStorage>,
    scm: Arc<dyn SourceControl>,
    platform: Arc<dyn CloudPlatform>,
    options: DeployOptions,
    jobs: Mutex<HashMap<String, TrackedJob>>,
}

#[derive(Clone)]
pub struct Deployer {
    inner: Arc<Inner>,
}

impl Deployer {
    pub fn new(
        ledger: Arc<Ledger>,
        storage: Arc<dyn ArchiveStorage>,
        scm: Arc<dyn SourceControl>,
        platform: Arc<dyn CloudPlatform>,
        options: DeployOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                storage,
                scm,
                platform,
                options,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wire the GitHub and Render adapters from settings.
    pub fn from_settings(
        settings: &Settings,
        ledger: Arc<Ledger>,
        storage: Arc<dyn ArchiveStorage>,
    ) -> DeployResult<Self> {
        let scm = GithubClient::new(&settings.github)?;
        let platform = RenderClient::new(&settings.render)?;
        Ok(Self::new(
            ledger,
            storage,
            Arc::new(scm),
            Arc::new(platform),
            DeployOptions::from_settings(settings),
        ))
    }

    /// First deployment of the tenant's latest build. Rejected with
    /// `AlreadyDeployed` once services are recorded.
    pub async fn deploy(&self, tenant_id: &str) -> DeployResult<DeployAck> {
        self.start(tenant_id, DeployAction::Deploy).await
    }

    /// Trigger a fresh deploy on every recorded service. Never provisions.
    pub async fn redeploy(&self, tenant_id: &str) -> DeployResult<DeployAck> {
        self.start(tenant_id, DeployAction::Redeploy).await
    }

    /// Move every recorded service back to its previous successful deploy.
    pub async fn rollback(&self, tenant_id: &str) -> DeployResult<DeployAck> {
        self.start(tenant_id, DeployAction::Rollback).await
    }

    /// Abort the running job and settle the tenant back to `generated`.
    pub async fn cancel(&self, tenant_id: &str) -> DeployResult<CancelAck> {
        let id = tenant_id.to_string();
        let cancelled = self.inner.with_ledger(move |l| l.cancel_deploy(&id)).await?;
        if let Some(job) = self.inner.jobs.lock().await.remove(tenant_id) {
            job.abort.abort();
            info!(tenant_id, job_id = %job.job_id, "deploy job aborted");
        }
        Ok(CancelAck {
            tenant_id: tenant_id.to_string(),
            status: TenantStatus::Generated,
            cancelled_job: cancelled,
        })
    }

    /// Aggregate per-service health. Tenants without recorded services are
    /// answered from the ledger alone.
    pub async fn check_status(&self, tenant_id: &str) -> DeployResult<DeployStatus> {
        let id = tenant_id.to_string();
        let tenant = self.inner.with_ledger(move |l| l.get_tenant(&id)).await?;

        let hosted = hosted_services(&tenant);
        if hosted.is_empty() {
            return Ok(DeployStatus {
                tenant_id: tenant.id,
                status: OverallStatus::NotDeployed,
                tenant_status: tenant.status,
                services: Vec::new(),
                urls: tenant.urls,
                last_error: tenant.last_error,
            });
        }

        let mut services = Vec::with_capacity(hosted.len());
        for (role, service_id) in hosted {
            let health = match self.inner.platform.service_health(&service_id).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(tenant_id, service = %role.as_str(), error = %e, "health check failed");
                    ServiceHealth::Unknown
                }
            };
            services.push(ServiceStatus {
                role,
                service_id,
                health,
            });
        }

        let status = if tenant.status == TenantStatus::Deploying {
            OverallStatus::Deploying
        } else {
            aggregate(services.iter().map(|s| s.health))
        };
        Ok(DeployStatus {
            tenant_id: tenant.id,
            status,
            tenant_status: tenant.status,
            services,
            urls: tenant.urls,
            last_error: tenant.last_error,
        })
    }

    /// Revert tenants left `deploying` by a previous process.
    pub async fn recover_stuck(&self, max_age: Duration) -> DeployResult<u32> {
        self.inner
            .with_ledger(move |l| l.recover_stuck(max_age))
            .await
    }

    /// Whether this process is running a job for `tenant_id`.
    pub async fn is_running(&self, tenant_id: &str) -> bool {
        self.inner.jobs.lock().await.contains_key(tenant_id)
    }

    async fn start(&self, tenant_id: &str, action: DeployAction) -> DeployResult<DeployAck> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let (id, jid) = (tenant_id.to_string(), job_id.clone());
        let tenant = self
            .inner
            .with_ledger(move |l| l.begin_deploy(&id, action, &jid))
            .await?;
        info!(tenant_id, job_id = %job_id, action = action.as_str(), "deploy job started");

        self.spawn_job(tenant, action, job_id.clone()).await;
        Ok(DeployAck {
            tenant_id: tenant_id.to_string(),
            status: TenantStatus::Deploying,
            action,
            job_id,
        })
    }

    async fn spawn_job(&self, tenant: Tenant, action: DeployAction, job_id: String) {
        let tenant_id = tenant.id.clone();
        // Held until the job is registered so the supervisor's removal
        // cannot run first.
        let mut jobs = self.inner.jobs.lock().await;

        let worker = {
            let inner = self.inner.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { inner.run(action, tenant, &job_id).await })
        };
        jobs.insert(
            tenant_id.clone(),
            TrackedJob {
                job_id: job_id.clone(),
                abort: worker.abort_handle(),
            },
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(Ok(state)) => Ok(state),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join) if join.is_cancelled() => Err("deployment cancelled".to_string()),
                Err(join) => {
                    let message = panic_message(join.into_panic());
                    Err(DeployError::Panicked(message).to_string())
                }
            };
            inner.settle(&tenant_id, &job_id, outcome).await;

            let mut jobs = inner.jobs.lock().await;
            if jobs.get(&tenant_id).is_some_and(|j| j.job_id == job_id) {
                jobs.remove(&tenant_id);
            }
        });
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn aggregate(health: impl Iterator<Item = ServiceHealth>) -> OverallStatus {
    let mut all_live = true;
    let mut any_deploying = false;
    for h in health {
        match h {
            ServiceHealth::Live => {}
            ServiceHealth::Deploying => {
                all_live = false;
                any_deploying = true;
            }
            ServiceHealth::Failed | ServiceHealth::Suspended | ServiceHealth::Unknown => {
                return OverallStatus::Degraded;
            }
        }
    }
    match (all_live, any_deploying) {
        (true, _) => OverallStatus::Live,
        (false, true) => OverallStatus::Deploying,
        (false, false) => OverallStatus::Degraded,
    }
}

// ─── Job body ─────────────────────────────────────────────────────────────────

impl Inner {
    async fn with_ledger<T, F>(self: &Arc<Self>, f: F) -> DeployResult<T>
    where
        F: FnOnce(&Ledger) -> kitforge_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        let result = tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| DeployError::Join(e.to_string()))?;
        Ok(result?)
    }

    /// The terminal ledger write for a job.
    async fn settle(
        self: &Arc<Self>,
        tenant_id: &str,
        job_id: &str,
        outcome: Result<Option<DeployedState>, String>,
    ) {
        let (tid, jid) = (tenant_id.to_string(), job_id.to_string());
        let write = match outcome {
            Ok(state) => {
                self.with_ledger(move |l| l.complete_deploy(&tid, &jid, state))
                    .await
            }
            Err(message) => {
                error!(tenant_id, job_id, error = %message, "deploy job failed");
                self.with_ledger(move |l| l.fail_deploy(&tid, &jid, &message))
                    .await
            }
        };
        match write {
            Ok(true) => info!(tenant_id, job_id, "deploy job settled"),
            Ok(false) => info!(tenant_id, job_id, "deploy job superseded; result ignored"),
            Err(e) => error!(tenant_id, job_id, error = %e, "could not record deploy outcome"),
        }
    }

    async fn run(
        self: Arc<Self>,
        action: DeployAction,
        tenant: Tenant,
        job_id: &str,
    ) -> DeployResult<Option<DeployedState>> {
        match action {
            DeployAction::Deploy => self.provision(&tenant, job_id).await.map(Some),
            DeployAction::Redeploy => {
                let services = hosted_services(&tenant);
                for (role, id) in &services {
                    let deploy_id = self.platform.trigger_deploy(id).await.inspect_err(|e| {
                        error!(tenant_id = %tenant.id, service = role.as_str(), error = %e, "redeploy trigger failed");
                    })?;
                    info!(tenant_id = %tenant.id, service = role.as_str(), deploy_id = %deploy_id, "redeploy triggered");
                }
                self.wait_live(&tenant.id, &services).await?;
                Ok(None)
            }
            DeployAction::Rollback => {
                let services = hosted_services(&tenant);
                for (role, id) in &services {
                    let history = self.platform.list_deploys(id, ROLLBACK_SEARCH).await?;
                    let target = rollback_target(&history).ok_or_else(|| DeployError::ServiceFailed {
                        service: role.as_str().to_string(),
                        status: "no previous deploy to roll back to".into(),
                    })?;
                    self.platform.rollback(id, &target.id).await.inspect_err(|e| {
                        error!(tenant_id = %tenant.id, service = role.as_str(), error = %e, "rollback failed");
                    })?;
                    info!(tenant_id = %tenant.id, service = role.as_str(), target = %target.id, "rollback started");
                }
                self.wait_live(&tenant.id, &services).await?;
                Ok(None)
            }
        }
    }

    async fn provision(self: &Arc<Self>, tenant: &Tenant, job_id: &str) -> DeployResult<DeployedState> {
        let build_id = tenant
            .latest_build_id
            .clone()
            .ok_or_else(|| kitforge_core::ForgeError::BuildNotFound(tenant.id.clone()))?;
        let build = self.with_ledger(move |l| l.get_build(&build_id)).await?;

        let bytes = self.storage.fetch(&build.storage).await?;
        let files = tokio::task::spawn_blocking(move || unpack(&bytes))
            .await
            .map_err(|e| DeployError::Join(e.to_string()))??;
        info!(tenant_id = %tenant.id, build_id = %build.id, files = files.len(), "archive unpacked");

        if !tenant.pending.is_empty() {
            info!(
                tenant_id = %tenant.id,
                services = tenant.pending.services.len(),
                "adopting resources from an earlier attempt"
            );
        }
        let repo = match &tenant.pending.repository {
            Some(repo) => repo.clone(),
            None => {
                let repo = self
                    .scm
                    .create_repository(&tenant.id, &tenant.company_name)
                    .await?;
                let (tid, pending) = (tenant.id.clone(), repo.clone());
                self.with_ledger(move |l| l.record_pending_repository(&tid, pending))
                    .await?;
                repo
            }
        };
        self.scm
            .push_files(&repo, &files, &format!("kitforge build {}", build.id))
            .await?;

        let layout = assemble::layout(&build.products);
        let plan = ServicePlan::new(&tenant.id, &layout, &repo);
        let (services, urls) = self.create_services(tenant, &build, &plan).await?;

        let hosted: Vec<(ServiceRole, String)> = services
            .iter()
            .filter(|(role, _)| **role != ServiceRole::Database)
            .map(|(role, id)| (*role, id.clone()))
            .collect();

        // Adopted services were built from an older commit and may have
        // failed; deploy them again before waiting.
        for (role, id) in &hosted {
            if tenant.pending.services.contains_key(role) {
                let deploy_id = self.platform.trigger_deploy(id).await.inspect_err(|e| {
                    log_service_error(&tenant.id, *role, e);
                })?;
                info!(tenant_id = %tenant.id, service = role.as_str(), deploy_id = %deploy_id, "adopted service redeployed");
            }
        }

        self.wait_live(&tenant.id, &hosted).await?;
        info!(tenant_id = %tenant.id, job_id, services = hosted.len(), "all services live");

        Ok(DeployedState {
            urls,
            services,
            repository: Some(repo),
        })
    }

    async fn create_services(
        self: &Arc<Self>,
        tenant: &Tenant,
        build: &GeneratedBuild,
        plan: &ServicePlan,
    ) -> DeployResult<(BTreeMap<ServiceRole, String>, DeployedUrls)> {
        let mut services = BTreeMap::new();
        let mut urls = DeployedUrls::default();
        let secrets = BuildSecrets::generate();

        let mut backend: Option<ProvisionedService> = None;
        let mut backend_vars = Vec::new();
        if let Some(mut spec) = plan.spec(ServiceRole::Backend) {
            let db_id = match tenant.pending.services.get(&ServiceRole::Database) {
                Some(id) => id.clone(),
                None => {
                    let id = self
                        .platform
                        .create_database(&DatabaseSpec {
                            name: format!("{}-db", tenant.id),
                        })
                        .await
                        .inspect_err(|e| log_service_error(&tenant.id, ServiceRole::Database, e))?;
                    self.remember(&tenant.id, ServiceRole::Database, &id, None).await?;
                    id
                }
            };
            services.insert(ServiceRole::Database, db_id.clone());
            let connection = self.platform.database_connection(&db_id).await?;

            backend_vars = backend_env(&connection, &secrets, &build.config.integrations);
            spec.env = backend_vars.clone();
            let created = self.ensure_service(tenant, ServiceRole::Backend, &spec).await?;
            services.insert(ServiceRole::Backend, created.id.clone());
            urls.backend = created.url.clone();
            backend = Some(created);
        }

        let api_url = backend.as_ref().and_then(|b| b.url.clone());
        for role in [ServiceRole::Frontend, ServiceRole::Site] {
            let Some(mut spec) = plan.spec(role) else {
                continue;
            };
            if let Some(api) = &api_url {
                spec.env.push(EnvVar::new("VITE_API_URL", api.as_str()));
            }
            let created = self.ensure_service(tenant, role, &spec).await?;
            services.insert(role, created.id.clone());
            urls.set(role, created.url);
        }

        // The backend learns its browser origins only once they exist. The
        // platform replaces the whole variable set, so resend everything. An
        // adopted backend still carries the previous attempt's secrets.
        if let Some(backend) = &backend {
            let origins: Vec<&str> = [urls.frontend.as_deref(), urls.site.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            let adopted = tenant.pending.services.contains_key(&ServiceRole::Backend);
            if adopted || !origins.is_empty() {
                let mut env = backend_vars.clone();
                if !origins.is_empty() {
                    env.push(EnvVar::new("CORS_ORIGIN", origins.join(",")));
                }
                self.platform
                    .set_env_vars(&backend.id, &env)
                    .await
                    .inspect_err(|e| log_service_error(&tenant.id, ServiceRole::Backend, e))?;
            }
        }

        Ok((services, urls))
    }

    /// The service recorded for `role` by an earlier attempt, or a new one.
    async fn ensure_service(
        self: &Arc<Self>,
        tenant: &Tenant,
        role: ServiceRole,
        spec: &ServiceSpec,
    ) -> DeployResult<ProvisionedService> {
        if let Some(id) = tenant.pending.services.get(&role) {
            return Ok(ProvisionedService {
                id: id.clone(),
                url: tenant.pending.urls.get(role).map(str::to_string),
            });
        }
        let created = self
            .platform
            .create_service(spec)
            .await
            .inspect_err(|e| log_service_error(&tenant.id, role, e))?;
        self.remember(&tenant.id, role, &created.id, created.url.clone())
            .await?;
        Ok(created)
    }

    async fn remember(
        self: &Arc<Self>,
        tenant_id: &str,
        role: ServiceRole,
        service_id: &str,
        url: Option<String>,
    ) -> DeployResult<()> {
        let (tid, sid) = (tenant_id.to_string(), service_id.to_string());
        self.with_ledger(move |l| l.record_pending_service(&tid, role, &sid, url))
            .await
    }

    async fn wait_live(self: &Arc<Self>, tenant_id: &str, services: &[(ServiceRole, String)]) -> DeployResult<()> {
        let started = Instant::now();
        let mut pending: Vec<(ServiceRole, String)> = services.to_vec();
        loop {
            let mut still = Vec::new();
            for (role, id) in pending {
                let health = match self.platform.service_health(&id).await {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(tenant_id, service = role.as_str(), error = %e, "health poll failed");
                        ServiceHealth::Unknown
                    }
                };
                match health {
                    ServiceHealth::Live => {
                        info!(tenant_id, service = role.as_str(), "service live");
                    }
                    ServiceHealth::Failed | ServiceHealth::Suspended => {
                        error!(tenant_id, service = role.as_str(), health = %health, "service unhealthy");
                        return Err(DeployError::ServiceFailed {
                            service: role.as_str().to_string(),
                            status: health.to_string(),
                        });
                    }
                    ServiceHealth::Deploying | ServiceHealth::Unknown => still.push((role, id)),
                }
            }
            if still.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= self.options.health_timeout {
                return Err(DeployError::HealthTimeout {
                    waited_secs: started.elapsed().as_secs(),
                    pending: still.iter().map(|(r, _)| r.as_str().to_string()).collect(),
                });
            }
            pending = still;
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

fn log_service_error(tenant_id: &str, role: ServiceRole, e: &DeployError) {
    error!(tenant_id, service = role.as_str(), error = %e, "provisioning failed");
}

fn hosted_services(tenant: &Tenant) -> Vec<(ServiceRole, String)> {
    tenant
        .services
        .iter()
        .filter(|(role, _)| **role != ServiceRole::Database)
        .map(|(role, id)| (*role, id.clone()))
        .collect()
}

/// The most recent successful deploy older than the current one.
fn rollback_target(history: &[DeployRecord]) -> Option<&DeployRecord> {
    history
        .iter()
        .skip(1)
        .find(|d| matches!(d.status.as_str(), "live" | "deactivated"))
}

fn backend_env(database_url: &str, secrets: &BuildSecrets, integrations: &Integrations) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar::new("NODE_ENV", "production"),
        EnvVar::new("DATABASE_URL", database_url),
        EnvVar::new("JWT_SECRET", secrets.jwt_secret.as_str()),
        EnvVar::new("SESSION_SECRET", secrets.session_secret.as_str()),
    ];
    let optional = [
        ("STRIPE_SECRET_KEY", &integrations.stripe_secret_key),
        ("STRIPE_PUBLISHABLE_KEY", &integrations.stripe_publishable_key),
        ("TWILIO_ACCOUNT_SID", &integrations.twilio_account_sid),
        ("TWILIO_AUTH_TOKEN", &integrations.twilio_auth_token),
        ("TWILIO_PHONE_NUMBER", &integrations.twilio_phone_number),
        ("GOOGLE_MAPS_API_KEY", &integrations.google_maps_api_key),
    ];
    env.extend(
        optional
            .into_iter()
            .filter_map(|(key, value)| value.as_deref().map(|v| EnvVar::new(key, v))),
    );
    env
}

// ─── Service plan ─────────────────────────────────────────────────────────────

/// Which hosted services a package layout needs, keyed by role.
///
/// The CRM yields a backend web service and a frontend static site. The
/// marketing site is one static site that also builds a nested admin. A
/// standalone admin takes the `site` role since it can only occur without the
/// marketing site.
pub struct ServicePlan {
    specs: BTreeMap<ServiceRole, ServiceSpec>,
}

impl ServicePlan {
    pub fn new(tenant_id: &str, layout: &Layout, repo: &RepositoryRef) -> Self {
        let mut specs = BTreeMap::new();
        let base = |role: ServiceRole, kind: ServiceKind, root_dir: String| ServiceSpec {
            name: format!("{tenant_id}-{}", role.as_str()),
            kind,
            repo_url: repo.url.clone(),
            branch: BRANCH.to_string(),
            root_dir,
            build_command: "npm install && npm run build".to_string(),
            start_command: None,
            publish_path: Some("dist".to_string()),
            env: Vec::new(),
        };

        if let Some(dir) = layout.dir(ProductId::Crm) {
            let mut backend = base(ServiceRole::Backend, ServiceKind::WebService, format!("{dir}/backend"));
            backend.build_command = "npm install".to_string();
            backend.start_command = Some("npm run seed && npm start".to_string());
            backend.publish_path = None;
            specs.insert(ServiceRole::Backend, backend);
            specs.insert(
                ServiceRole::Frontend,
                base(ServiceRole::Frontend, ServiceKind::StaticSite, format!("{dir}/frontend")),
            );
        }

        if let Some(dir) = layout.dir(ProductId::Site) {
            let mut site = base(ServiceRole::Site, ServiceKind::StaticSite, dir.to_string());
            if layout.admin_nested() {
                site.build_command = "npm install && npm run build && cd admin && npm install \
                                      && npm run build && mkdir -p ../dist/admin && cp -r dist/. ../dist/admin/"
                    .to_string();
            }
            specs.insert(ServiceRole::Site, site);
        } else if let Some(dir) = layout.dir(ProductId::Admin) {
            specs.insert(
                ServiceRole::Site,
                base(ServiceRole::Site, ServiceKind::StaticSite, dir.to_string()),
            );
        }

        Self { specs }
    }

    pub fn spec(&self, role: ServiceRole) -> Option<ServiceSpec> {
        self.specs.get(&role).cloned()
    }

    pub fn roles(&self) -> Vec<ServiceRole> {
        self.specs.keys().copied().collect()
    }
}

// ─── Archive unpacking ────────────────────────────────────────────────────────

/// Every file entry of a package archive, with paths made safe for a tree.
pub fn unpack(bytes: &[u8]) -> DeployResult<Vec<RepoFile>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name() else {
            return Err(DeployError::Unpack(format!("unsafe entry path '{}'", entry.name())));
        };
        let path = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let executable = entry.unix_mode().is_some_and(|m| m & 0o111 != 0);
        // The declared size comes from the archive header; bound the guess.
        let mut contents = Vec::with_capacity((entry.size() as usize).min(1 << 20));
        entry
            .read_to_end(&mut contents)
            .map_err(|e| DeployError::Unpack(format!("{path}: {e}")))?;
        files.push(RepoFile {
            path,
            contents,
            executable,
        });
    }
    Ok(files)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
