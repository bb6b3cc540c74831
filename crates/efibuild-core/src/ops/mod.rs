//! Phase drivers: resolve, build, patch.
//!
//! Each driver takes a [`Context`] and reports through its
//! [`Reporter`](crate::reporter::Reporter). Errors carry context for the
//! command line and are `anyhow` errors from here on.

pub mod build;
pub mod context;
pub mod patch;
pub mod resolve;

use std::path::Path;

use anyhow::{Context as _, Result};

pub use build::{BuildReport, build};
pub use context::Context;
pub use patch::{PatchOptions, patch};
pub use resolve::{Resolution, resolve};

use crate::io::digest::{digest, tagged};
use crate::lockfile::Lockfile;
use crate::manifest::Manifest;

/// Load a manifest and the lockfile resolved from it, warning when the
/// manifest changed since.
pub fn load_locked(ctx: &Context, manifest_path: &Path, lockfile_path: &Path) -> Result<(Manifest, Lockfile)> {
    let manifest = Manifest::load(manifest_path, &[])
        .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;
    if !lockfile_path.is_file() {
        anyhow::bail!("{} does not exist; resolve first", lockfile_path.display());
    }
    let lockfile = Lockfile::load(lockfile_path)
        .with_context(|| format!("Failed to load lockfile {}", lockfile_path.display()))?;

    let recorded = lockfile
        .revision
        .as_ref()
        .and_then(|r| r.get("manifest"))
        .and_then(efibuild_schema::Value::as_str);
    let current = tagged(&digest(manifest_path)?);
    if recorded.is_some_and(|r| r != current) {
        ctx.reporter.warning(&format!(
            "{} changed since {} was written",
            manifest_path.display(),
            lockfile_path.display()
        ));
    }
    Ok((manifest, lockfile))
}

/// Build from an existing lockfile and save the checksums it observed.
pub async fn build_locked(ctx: &Context, manifest_path: &Path, lockfile_path: &Path) -> Result<BuildReport> {
    let (manifest, mut lockfile) = load_locked(ctx, manifest_path, lockfile_path)?;
    let report = build(ctx, &manifest, &mut lockfile).await?;
    lockfile
        .save(lockfile_path)
        .with_context(|| format!("Failed to write lockfile {}", lockfile_path.display()))?;
    Ok(report)
}

/// Resolve, build and patch in one go.
pub async fn run(
    ctx: &Context,
    manifest_path: &Path,
    lockfile_path: &Path,
    resolve_opts: crate::lockfile::ResolveOptions,
    patch_opts: &PatchOptions,
) -> Result<()> {
    let Resolution {
        manifest,
        mut lockfile,
        ..
    } = resolve(ctx, manifest_path, lockfile_path, resolve_opts).await?;
    build(ctx, &manifest, &mut lockfile).await?;
    lockfile
        .save(lockfile_path)
        .with_context(|| format!("Failed to write lockfile {}", lockfile_path.display()))?;
    patch(ctx, &manifest, patch_opts)?;
    Ok(())
}
