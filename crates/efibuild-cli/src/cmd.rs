//! Subcommand dispatch.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use efibuild_core::manifest::Manifest;
use efibuild_core::ops::{self, Context};
use efibuild_core::{CatalogConfig, Reporter};

use crate::console::ConsoleReporter;
use crate::{Cli, Commands, ProjectArgs};

fn context(cli: &Cli, project: &ProjectArgs, reporter: Arc<dyn Reporter>) -> Result<Context> {
    let env = cli.environment(project);
    tracing::debug!(output = %env.output.display(), authenticated = env.token.is_some(), "environment");
    Context::github(env, CatalogConfig::default(), reporter).context("Failed to set up the HTTP client")
}

/// Run the parsed command line, reporting any failure before returning it.
pub async fn execute(cli: &Cli) -> Result<()> {
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(cli.verbose));
    let outcome = dispatch(cli, reporter.clone()).await;
    if let Err(e) = &outcome {
        reporter.error(&format!("{e:#}"));
    }
    outcome
}

async fn dispatch(cli: &Cli, reporter: Arc<dyn Reporter>) -> Result<()> {
    match &cli.command {
        Commands::Resolve { project, resolve } => {
            let ctx = context(cli, project, reporter)?;
            ops::resolve(&ctx, &project.manifest, &project.lockfile, (*resolve).into()).await?;
        }
        Commands::Build { project } => {
            let ctx = context(cli, project, reporter)?;
            ops::build_locked(&ctx, &project.manifest, &project.lockfile).await?;
        }
        Commands::Patch { project, patch } => {
            let ctx = context(cli, project, reporter)?;
            let manifest = Manifest::load(&project.manifest, &[])
                .with_context(|| format!("Failed to load manifest {}", project.manifest.display()))?;
            ops::patch(&ctx, &manifest, &patch.clone().into())?;
        }
        Commands::Run {
            project,
            resolve,
            patch,
        } => {
            let ctx = context(cli, project, reporter)?;
            ops::run(
                &ctx,
                &project.manifest,
                &project.lockfile,
                (*resolve).into(),
                &patch.clone().into(),
            )
            .await?;
        }
    }
    Ok(())
}
