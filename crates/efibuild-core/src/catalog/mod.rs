//! Remote source catalog: tag lists, release/artifact URLs, the prebuilt
//! build catalog, and rate-limit inspection.

pub mod github;
pub mod prebuilt;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use efibuild_schema::BuildVariant;

use crate::error::Result;

pub use github::GithubCatalog;
pub use prebuilt::{PrebuiltBuild, PrebuiltCatalog};

/// Provider endpoints. Defaults point at GitHub; tests point them at a
/// mock server.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// REST API base.
    pub api: String,
    /// Web (HTML) base, used for release pages and artifact links.
    pub web: String,
    /// Raw file content base.
    pub raw: String,
    /// Repository hosting the prebuilt build catalog.
    pub build_repo: String,
    /// Branch of `build_repo` holding `config.json`.
    pub build_branch: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api: "https://api.github.com".to_string(),
            web: "https://github.com".to_string(),
            raw: "https://raw.githubusercontent.com".to_string(),
            build_repo: "dortania/build-repo".to_string(),
            build_branch: "builds".to_string(),
        }
    }
}

impl CatalogConfig {
    /// Same endpoints for every base, as served by a single mock server.
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api: base.clone(),
            web: base.clone(),
            raw: base,
            ..Self::default()
        }
    }
}

/// Remaining API quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

/// Which workflow run an artifact should come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReference {
    Branch(String),
    /// Full or abbreviated commit sha.
    Commit(String),
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Every tag of `repo`, in provider order.
    async fn tag_names(&self, repo: &str) -> Result<Vec<String>>;

    /// Download URL of the `tag` release asset best matching `build`, or
    /// the release page when the release has no assets.
    async fn release_asset_url(&self, repo: &str, tag: &str, build: BuildVariant) -> Result<String>;

    /// Artifact URL of the newest run of `workflow` (any workflow if `None`)
    /// on `reference`.
    async fn artifact_url(
        &self,
        repo: &str,
        reference: &RunReference,
        workflow: Option<&str>,
        build: BuildVariant,
    ) -> Result<String>;

    /// Source archive URL of `repo` at a branch, tag or commit.
    fn archive_url(&self, repo: &str, reference: &str) -> String;

    /// Raw content URL of `path` at `reference` (branch, tag or commit).
    fn file_url(&self, repo: &str, path: &str, reference: &str) -> String;

    /// The prebuilt build catalog, refreshed at most every 30 minutes.
    async fn prebuilt_catalog(&self) -> Result<PrebuiltCatalog>;

    async fn rate_limit(&self) -> Result<RateLimit>;

    /// Last-updated stamps of the remote catalogs consulted so far, for the
    /// lockfile frontmatter.
    async fn timestamps(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
