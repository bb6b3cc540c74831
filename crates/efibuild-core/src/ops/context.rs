//! Shared phase context.
//!
//! Groups the state every phase needs so the drivers take one argument
//! instead of five.

use std::sync::Arc;

use crate::catalog::github::build_client;
use crate::catalog::{CatalogConfig, GithubCatalog, SourceCatalog};
use crate::env::Environment;
use crate::reporter::Reporter;

/// Groups common state used by the resolve, build and patch phases.
#[derive(Clone)]
pub struct Context {
    pub env: Environment,
    pub client: reqwest::Client,
    pub catalog: Arc<dyn SourceCatalog>,
    pub reporter: Arc<dyn Reporter>,
}

impl Context {
    pub fn new(
        env: Environment,
        client: reqwest::Client,
        catalog: Arc<dyn SourceCatalog>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            env,
            client,
            catalog,
            reporter,
        }
    }

    /// A context backed by the GitHub catalog at `config`, authenticated
    /// with the environment's token when one is set.
    pub fn github(env: Environment, config: CatalogConfig, reporter: Arc<dyn Reporter>) -> crate::Result<Self> {
        let client = build_client(env.token.as_deref())?;
        let catalog = Arc::new(GithubCatalog::new(client.clone(), config));
        Ok(Self::new(env, client, catalog, reporter))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
