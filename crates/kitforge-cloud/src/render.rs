//! Render REST v1 adapter for [`CloudPlatform`].

use crate::error::{DeployError, DeployResult};
use crate::ports::{
    CloudPlatform, DatabaseSpec, DeployRecord, EnvVar, ProvisionedService, ServiceHealth,
    ServiceKind, ServiceSpec,
};
use async_trait::async_trait;
use kitforge_core::config::RenderSettings;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "render";
const DATABASE_PLAN: &str = "basic_256mb";
const POSTGRES_VERSION: &str = "16";

#[derive(Clone)]
pub struct RenderClient {
    client: Client,
    api_url: String,
    api_key: String,
    owner_id: String,
    region: String,
    plan: String,
}

impl std::fmt::Debug for RenderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderClient")
            .field("api_url", &self.api_url)
            .field("owner_id", &self.owner_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceBody {
    id: String,
    #[serde(default)]
    suspended: Option<String>,
    #[serde(default)]
    service_details: Option<ServiceDetails>,
}

#[derive(Debug, Deserialize)]
struct ServiceDetails {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedService {
    service: ServiceBody,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionInfo {
    internal_connection_string: String,
}

#[derive(Debug, Deserialize)]
struct DeployEntry {
    deploy: DeployBody,
}

#[derive(Debug, Deserialize)]
struct DeployBody {
    id: String,
    status: String,
}

impl RenderClient {
    pub fn new(settings: &RenderSettings) -> DeployResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| DeployError::NotConfigured("RENDER_API_KEY is not set".into()))?;
        let owner_id = settings
            .owner_id
            .clone()
            .ok_or_else(|| DeployError::NotConfigured("RENDER_OWNER_ID is not set".into()))?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key,
            owner_id,
            region: settings.region.clone(),
            plan: settings.plan.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> DeployResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::Api {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        response.json::<T>().await.map_err(|e| DeployError::Response {
            service: SERVICE,
            reason: e.to_string(),
        })
    }

    fn service_body(&self, spec: &ServiceSpec) -> Value {
        let env: Vec<Value> = spec
            .env
            .iter()
            .map(|v| json!({ "key": v.key, "value": v.value }))
            .collect();
        let (kind, details) = match spec.kind {
            ServiceKind::WebService => (
                "web_service",
                json!({
                    "runtime": "node",
                    "plan": self.plan,
                    "region": self.region,
                    "envSpecificDetails": {
                        "buildCommand": spec.build_command,
                        "startCommand": spec.start_command.clone().unwrap_or_default(),
                    },
                }),
            ),
            ServiceKind::StaticSite => (
                "static_site",
                json!({
                    "buildCommand": spec.build_command,
                    "publishPath": spec.publish_path.clone().unwrap_or_else(|| "dist".into()),
                }),
            ),
        };
        json!({
            "type": kind,
            "name": spec.name,
            "ownerId": self.owner_id,
            "repo": spec.repo_url,
            "branch": spec.branch,
            "rootDir": spec.root_dir,
            "autoDeploy": "yes",
            "envVars": env,
            "serviceDetails": details,
        })
    }
}

#[async_trait]
impl CloudPlatform for RenderClient {
    async fn create_database(&self, spec: &DatabaseSpec) -> DeployResult<String> {
        let body = json!({
            "name": spec.name,
            "ownerId": self.owner_id,
            "plan": DATABASE_PLAN,
            "region": self.region,
            "version": POSTGRES_VERSION,
        });
        let db: IdBody = self
            .send(self.request(Method::POST, "/postgres").json(&body))
            .await?;
        info!(database = %spec.name, id = %db.id, "database provisioned");
        Ok(db.id)
    }

    async fn database_connection(&self, database_id: &str) -> DeployResult<String> {
        let info: ConnectionInfo = self
            .send(self.request(
                Method::GET,
                &format!("/postgres/{database_id}/connection-info"),
            ))
            .await?;
        Ok(info.internal_connection_string)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> DeployResult<ProvisionedService> {
        let created: CreatedService = self
            .send(
                self.request(Method::POST, "/services")
                    .json(&self.service_body(spec)),
            )
            .await?;
        let url = created.service.service_details.and_then(|d| d.url);
        info!(service = %spec.name, id = %created.service.id, "service created");
        Ok(ProvisionedService {
            id: created.service.id,
            url,
        })
    }

    async fn set_env_vars(&self, service_id: &str, vars: &[EnvVar]) -> DeployResult<()> {
        let body: Vec<Value> = vars
            .iter()
            .map(|v| json!({ "key": v.key, "value": v.value }))
            .collect();
        let _: Value = self
            .send(
                self.request(Method::PUT, &format!("/services/{service_id}/env-vars"))
                    .json(&body),
            )
            .await?;
        debug!(service = service_id, count = vars.len(), "env vars set");
        Ok(())
    }

    async fn service_health(&self, service_id: &str) -> DeployResult<ServiceHealth> {
        let service: ServiceBody = self
            .send(self.request(Method::GET, &format!("/services/{service_id}")))
            .await?;
        if service.suspended.as_deref() == Some("suspended") {
            return Ok(ServiceHealth::Suspended);
        }
        let latest = self.list_deploys(&service.id, 1).await?;
        Ok(latest
            .first()
            .map(|d| ServiceHealth::from_deploy_status(&d.status))
            .unwrap_or(ServiceHealth::Unknown))
    }

    async fn trigger_deploy(&self, service_id: &str) -> DeployResult<String> {
        let deploy: IdBody = self
            .send(
                self.request(Method::POST, &format!("/services/{service_id}/deploys"))
                    .json(&json!({ "clearCache": "do_not_clear" })),
            )
            .await?;
        Ok(deploy.id)
    }

    async fn list_deploys(&self, service_id: &str, limit: u32) -> DeployResult<Vec<DeployRecord>> {
        let entries: Vec<DeployEntry> = self
            .send(
                self.request(Method::GET, &format!("/services/{service_id}/deploys"))
                    .query(&[("limit", limit.to_string())]),
            )
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| DeployRecord {
                id: e.deploy.id,
                status: e.deploy.status,
            })
            .collect())
    }

    async fn rollback(&self, service_id: &str, deploy_id: &str) -> DeployResult<String> {
        let deploy: IdBody = self
            .send(
                self.request(Method::POST, &format!("/services/{service_id}/rollback"))
                    .json(&json!({ "deployId": deploy_id })),
            )
            .await?;
        Ok(deploy.id)
    }
}
