//! GitHub-backed [`SourceCatalog`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use efibuild_schema::BuildVariant;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::prebuilt::{PrebuiltCache, parse_catalog};
use super::{CatalogConfig, PrebuiltCatalog, RateLimit, RunReference, SourceCatalog};
use crate::error::{Error, Result};

const PER_PAGE: usize = 100;

/// Build an HTTP client carrying the User-Agent and, when given, a bearer
/// token.
pub fn build_client(token: Option<&str>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_static(crate::USER_AGENT),
    );

    if let Some(t) = token {
        let value = header::HeaderValue::from_str(&format!("Bearer {t}"))
            .map_err(|e| Error::Catalog(format!("invalid token: {e}")))?;
        headers.insert(header::AUTHORIZATION, value);
    }

    Ok(Client::builder().default_headers(headers).build()?)
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

#[derive(Deserialize)]
struct Release {
    html_url: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

#[derive(Deserialize)]
struct Runs {
    workflow_runs: Vec<Run>,
}

#[derive(Deserialize)]
struct Run {
    id: u64,
    name: Option<String>,
    path: Option<String>,
    head_sha: String,
    check_suite_id: u64,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct Artifacts {
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
struct Artifact {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct RateLimitBody {
    resources: RateResources,
}

#[derive(Deserialize)]
struct RateResources {
    core: RateCore,
}

#[derive(Deserialize)]
struct RateCore {
    remaining: u64,
    reset: i64,
}

#[derive(Deserialize)]
struct CommitBody {
    commit: CommitInner,
}

#[derive(Deserialize)]
struct CommitInner {
    committer: Committer,
}

#[derive(Deserialize)]
struct Committer {
    date: DateTime<Utc>,
}

/// Pick the asset for `build`: name contains the variant (case-insensitive),
/// else the first zip.
fn select_asset<'a>(names: impl IntoIterator<Item = &'a str> + Clone, build: BuildVariant) -> Option<&'a str> {
    let variant = build.as_str().to_lowercase();
    names
        .clone()
        .into_iter()
        .find(|n| n.to_lowercase().contains(&variant))
        .or_else(|| {
            names
                .into_iter()
                .find(|n| n.to_lowercase().ends_with(".zip"))
        })
}

fn epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub struct GithubCatalog {
    client: Client,
    config: CatalogConfig,
    prebuilt: Mutex<PrebuiltCache>,
}

impl GithubCatalog {
    pub fn new(client: Client, config: CatalogConfig) -> Self {
        Self {
            client,
            config,
            prebuilt: Mutex::new(PrebuiltCache::default()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Direct download URL of a named release asset.
    pub fn asset_download_url(&self, repo: &str, tag: &str, asset: &str) -> String {
        format!("{}/{repo}/releases/download/{tag}/{asset}", self.config.web)
    }

    /// Protected artifact URL of a workflow run's check suite.
    pub fn suite_artifact_url(&self, repo: &str, suite_id: u64, artifact_id: u64) -> String {
        format!(
            "{}/{repo}/suites/{suite_id}/artifacts/{artifact_id}",
            self.config.web
        )
    }

    /// GET `url` and decode JSON, surfacing exhausted quota as
    /// [`Error::RateLimited`]. A 404 yields `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        tracing::debug!("GET {url}");
        let resp = self.client.get(url).send().await?;

        if resp.status() == StatusCode::FORBIDDEN || resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let header_num = |name: &str| {
                resp.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok())
            };
            if header_num("x-ratelimit-remaining") == Some(0) {
                let reset = epoch(header_num("x-ratelimit-reset").unwrap_or_default());
                return Err(Error::RateLimited { reset });
            }
        }
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }

    async fn latest_build_timestamp(&self) -> Result<DateTime<Utc>> {
        let url = format!(
            "{}/repos/{}/commits/{}",
            self.config.api, self.config.build_repo, self.config.build_branch
        );
        let body: CommitBody = self
            .get_json(&url)
            .await?
            .ok_or_else(|| Error::Catalog(format!("{url} not found")))?;
        Ok(body.commit.committer.date)
    }
}

impl std::fmt::Debug for GithubCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubCatalog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceCatalog for GithubCatalog {
    async fn tag_names(&self, repo: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let url = format!(
                "{}/repos/{repo}/tags?per_page={PER_PAGE}&page={page}",
                self.config.api
            );
            let tags: Vec<Tag> = self.get_json(&url).await?.unwrap_or_default();
            let count = tags.len();
            names.extend(tags.into_iter().map(|t| t.name));
            if count < PER_PAGE {
                break;
            }
        }
        Ok(names)
    }

    async fn release_asset_url(&self, repo: &str, tag: &str, build: BuildVariant) -> Result<String> {
        let url = format!("{}/repos/{repo}/releases/tags/{tag}", self.config.api);
        let release: Release =
            self.get_json(&url)
                .await?
                .ok_or_else(|| Error::VersionUnresolved {
                    name: repo.to_string(),
                    specifier: tag.to_string(),
                })?;

        let names = release.assets.iter().map(|a| a.name.as_str());
        Ok(match select_asset(names, build) {
            Some(name) => release
                .assets
                .iter()
                .find(|a| a.name == name)
                .map_or_else(
                    || self.asset_download_url(repo, tag, name),
                    |a| a.browser_download_url.clone(),
                ),
            None => release.html_url,
        })
    }

    async fn artifact_url(
        &self,
        repo: &str,
        reference: &RunReference,
        workflow: Option<&str>,
        build: BuildVariant,
    ) -> Result<String> {
        let query = match reference {
            RunReference::Branch(b) => format!("branch={b}"),
            RunReference::Commit(sha) if sha.len() == 40 => format!("head_sha={sha}"),
            RunReference::Commit(_) => String::new(),
        };
        let url = format!(
            "{}/repos/{repo}/actions/runs?per_page={PER_PAGE}&{query}",
            self.config.api
        );
        let runs: Runs = self.get_json(&url).await?.unwrap_or(Runs {
            workflow_runs: Vec::new(),
        });

        let unresolved = || Error::VersionUnresolved {
            name: repo.to_string(),
            specifier: match reference {
                RunReference::Branch(b) => format!("branch={b}"),
                RunReference::Commit(c) => format!("commit={c}"),
            },
        };

        let run = runs
            .workflow_runs
            .into_iter()
            .filter(|r| match reference {
                RunReference::Commit(sha) => r.head_sha.starts_with(sha.as_str()),
                RunReference::Branch(_) => true,
            })
            .filter(|r| {
                workflow.is_none_or(|w| {
                    r.name.as_deref() == Some(w)
                        || r.path.as_deref().is_some_and(|p| p.ends_with(w))
                })
            })
            .find(|r| r.conclusion.as_deref() != Some("failure"))
            .ok_or_else(unresolved)?;

        let url = format!(
            "{}/repos/{repo}/actions/runs/{}/artifacts",
            self.config.api, run.id
        );
        let artifacts: Artifacts = self.get_json(&url).await?.ok_or_else(unresolved)?;
        let name = select_asset(artifacts.artifacts.iter().map(|a| a.name.as_str()), build)
            .or_else(|| artifacts.artifacts.first().map(|a| a.name.as_str()))
            .ok_or_else(unresolved)?;
        let artifact = artifacts
            .artifacts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(unresolved)?;

        Ok(self.suite_artifact_url(repo, run.check_suite_id, artifact.id))
    }

    fn archive_url(&self, repo: &str, reference: &str) -> String {
        format!("{}/{repo}/archive/{reference}.zip", self.config.web)
    }

    fn file_url(&self, repo: &str, path: &str, reference: &str) -> String {
        format!(
            "{}/{repo}/{reference}/{}",
            self.config.raw,
            path.trim_start_matches('/')
        )
    }

    async fn prebuilt_catalog(&self) -> Result<PrebuiltCatalog> {
        let mut cache = self.prebuilt.lock().await;
        let now = Utc::now();

        if cache.is_stale(now) {
            let remote = self.latest_build_timestamp().await?;
            if cache.needs_catalog(remote) {
                let url = format!(
                    "{}/{}/{}/config.json",
                    self.config.raw, self.config.build_repo, self.config.build_branch
                );
                let json: serde_json::Value = self
                    .get_json(&url)
                    .await?
                    .ok_or_else(|| Error::Catalog(format!("{url} not found")))?;
                cache.store(now, remote, parse_catalog(&json));
            } else {
                cache.touch(now);
            }
        }

        cache
            .snapshot()
            .ok_or_else(|| Error::Catalog("prebuilt catalog unavailable".to_string()))
    }

    async fn rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.config.api);
        let body: RateLimitBody = self
            .get_json(&url)
            .await?
            .ok_or_else(|| Error::Catalog(format!("{url} not found")))?;
        Ok(RateLimit {
            remaining: body.resources.core.remaining,
            reset: epoch(body.resources.core.reset),
        })
    }

    async fn timestamps(&self) -> BTreeMap<String, String> {
        let cache = self.prebuilt.lock().await;
        cache
            .snapshot()
            .map(|c| {
                BTreeMap::from([(
                    self.config.build_repo.clone(),
                    c.last_updated.to_rfc3339(),
                )])
            })
            .unwrap_or_default()
    }
}
