//! Resolve phase: manifest in, lockfile out.

use std::path::Path;

use anyhow::{Context as _, Result};

use super::context::Context;
use crate::io::digest::{digest, tagged};
use crate::lockfile::{Lockfile, ResolveOptions, ResolveReport, resolve_manifest};
use crate::manifest::Manifest;

/// Result of a resolve run.
#[derive(Debug)]
pub struct Resolution {
    pub manifest: Manifest,
    pub lockfile: Lockfile,
    pub report: ResolveReport,
}

/// Load the manifest and lockfile, bring the lockfile in line and save it.
///
/// A missing lockfile starts empty. Recoverable per-entry failures are
/// reported and left out of the saved file; with `opts.strict` they fail
/// the phase after saving.
pub async fn resolve(
    ctx: &Context,
    manifest_path: &Path,
    lockfile_path: &Path,
    opts: ResolveOptions,
) -> Result<Resolution> {
    ctx.reporter.section("Resolving");
    let manifest = Manifest::load(manifest_path, &[])
        .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;
    tracing::debug!(entries = manifest.entries.len(), "loaded manifest");

    let mut lockfile = Lockfile::load(lockfile_path)
        .with_context(|| format!("Failed to load lockfile {}", lockfile_path.display()))?;

    let report = resolve_manifest(
        &mut lockfile,
        &manifest,
        ctx.catalog.as_ref(),
        opts,
        ctx.reporter.as_ref(),
    )
    .await
    .context("Resolution aborted")?;

    let manifest_digest = digest(manifest_path)
        .with_context(|| format!("Failed to hash {}", manifest_path.display()))?;
    lockfile.set_manifest_revision(&tagged(&manifest_digest));
    lockfile
        .save(lockfile_path)
        .with_context(|| format!("Failed to write lockfile {}", lockfile_path.display()))?;

    ctx.reporter.success(&format!(
        "Resolved {} entries ({} unchanged, {} failed)",
        report.resolved.len(),
        report.skipped.len(),
        report.failures.len()
    ));

    if opts.strict && !report.failures.is_empty() {
        let names: Vec<String> = report
            .failures
            .iter()
            .map(|(category, name, _)| format!("{category}/{name}"))
            .collect();
        anyhow::bail!("Failed to resolve: {}", names.join(", "));
    }

    Ok(Resolution {
        manifest,
        lockfile,
        report,
    })
}
