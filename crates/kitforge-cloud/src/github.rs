//! GitHub REST v3 adapter for [`SourceControl`].

use crate::error::{DeployError, DeployResult};
use crate::ports::{RepoFile, SourceControl};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use kitforge_core::config::GithubSettings;
use kitforge_core::ledger::RepositoryRef;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "github";
const BRANCH: &str = "main";
/// Concurrent blob uploads per push.
const BLOB_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
    token: String,
    owner: String,
    private: bool,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    html_url: String,
    owner: OwnerResponse,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

impl GithubClient {
    pub fn new(settings: &GithubSettings) -> DeployResult<Self> {
        let token = settings
            .token
            .clone()
            .ok_or_else(|| DeployError::NotConfigured("GITHUB_TOKEN is not set".into()))?;
        let owner = settings
            .owner
            .clone()
            .ok_or_else(|| DeployError::NotConfigured("GITHUB_OWNER is not set".into()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("kitforge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token,
            owner,
            private: settings.private_repos,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> DeployResult<T> {
        let response = check(builder.send().await?).await?;
        response.json::<T>().await.map_err(|e| DeployError::Response {
            service: SERVICE,
            reason: e.to_string(),
        })
    }

    async fn get_repository(&self, name: &str) -> DeployResult<RepositoryRef> {
        let repo: RepoResponse = self
            .send(self.request(Method::GET, &format!("/repos/{}/{}", self.owner, name)))
            .await?;
        Ok(repo.into())
    }

    async fn create_blob(&self, repo: &RepositoryRef, file: &RepoFile) -> DeployResult<String> {
        let body = json!({
            "content": base64::engine::general_purpose::STANDARD.encode(&file.contents),
            "encoding": "base64",
        });
        let blob: ShaResponse = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/blobs"))
                    .json(&body),
            )
            .await?;
        Ok(blob.sha)
    }
}

impl From<RepoResponse> for RepositoryRef {
    fn from(r: RepoResponse) -> Self {
        RepositoryRef {
            owner: r.owner.login,
            name: r.name,
            url: r.html_url,
        }
    }
}

fn repo_path(repo: &RepositoryRef, suffix: &str) -> String {
    format!("/repos/{}/{}{}", repo.owner, repo.name, suffix)
}

async fn check(response: Response) -> DeployResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeployError::Api {
        service: SERVICE,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SourceControl for GithubClient {
    async fn create_repository(&self, name: &str, description: &str) -> DeployResult<RepositoryRef> {
        let body = json!({
            "name": name,
            "description": description,
            "private": self.private,
            "auto_init": true,
        });

        // Organisation first; a 404 means the owner is a user account.
        let org = self
            .request(Method::POST, &format!("/orgs/{}/repos", self.owner))
            .json(&body)
            .send()
            .await?;
        let response = if org.status() == StatusCode::NOT_FOUND {
            self.request(Method::POST, "/user/repos")
                .json(&body)
                .send()
                .await?
        } else {
            org
        };

        // 422: the name is taken, which is the case on a repeat deploy.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(repo = name, "repository exists; reusing");
            return self.get_repository(name).await;
        }
        let repo: RepoResponse = check(response).await?.json().await.map_err(|e| {
            DeployError::Response {
                service: SERVICE,
                reason: e.to_string(),
            }
        })?;
        let repo = RepositoryRef::from(repo);
        info!(repo = %repo.url, "repository created");
        Ok(repo)
    }

    async fn push_files(
        &self,
        repo: &RepositoryRef,
        files: &[RepoFile],
        message: &str,
    ) -> DeployResult<String> {
        let head: RefResponse = self
            .send(self.request(
                Method::GET,
                &repo_path(repo, &format!("/git/ref/heads/{BRANCH}")),
            ))
            .await?;

        let blobs: Vec<_> = files.iter().map(|file| self.create_blob(repo, file)).collect();
        let shas: Vec<String> = stream::iter(blobs)
            .buffered(BLOB_CONCURRENCY)
            .try_collect()
            .await?;

        let entries: Vec<serde_json::Value> = files
            .iter()
            .zip(shas)
            .map(|(file, sha)| {
                json!({
                    "path": file.path,
                    "mode": if file.executable { "100755" } else { "100644" },
                    "type": "blob",
                    "sha": sha,
                })
            })
            .collect();
        let tree: ShaResponse = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/trees"))
                    .json(&json!({ "tree": entries })),
            )
            .await?;

        let commit: ShaResponse = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/commits"))
                    .json(&json!({
                        "message": message,
                        "tree": tree.sha,
                        "parents": [head.object.sha],
                    })),
            )
            .await?;

        let _: serde_json::Value = self
            .send(
                self.request(
                    Method::PATCH,
                    &repo_path(repo, &format!("/git/refs/heads/{BRANCH}")),
                )
                .json(&json!({ "sha": commit.sha, "force": true })),
            )
            .await?;

        info!(repo = %repo.url, files = files.len(), commit = %commit.sha, "code pushed");
        Ok(commit.sha)
    }
}
