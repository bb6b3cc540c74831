//! Patch phase: rewrite `config.plist` to match the assembled tree.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use efibuild_schema::Category;
use tracing::{debug, warn};

use super::context::Context;
use crate::config::tables::{merge_record, rewrite_tables};
use crate::config::{
    CONFIG_PATH, Patch, REFERENCE_PATH, SAMPLE_PATH, apply_patch, apply_schema_defaults,
    load_config,
};
use crate::io::fs::PathExt;
use crate::manifest::Manifest;
use crate::parsers::plist::{PlistOptions, read_plist, save_plist};
use crate::parsers::schema;

#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Rebuild component tables from scratch instead of merging over the
    /// existing records.
    pub clean: bool,
    /// Patch documents, applied in order.
    pub patches: Vec<PathBuf>,
}

/// Rebuild component tables, apply patches over them, fill schema defaults
/// and save the configuration. Returns the path written.
pub fn patch(ctx: &Context, manifest: &Manifest, opts: &PatchOptions) -> Result<PathBuf> {
    ctx.reporter.section("Patching");
    let output = ctx.env.output.as_path();
    let config_path = output.join(CONFIG_PATH);
    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    let mut flags = manifest.flags.clone();
    flags.push(manifest.build.to_string());
    flags.push(manifest.target.to_string());

    rewrite_tables(&mut config, output, opts.clean).context("Failed to rebuild component tables")?;
    apply_properties(&mut config, manifest);

    // Patches go over the rebuilt tables so their edits survive.
    for path in &opts.patches {
        let patch = Patch::load(path, &flags)
            .with_context(|| format!("Failed to load patch {}", path.display()))?;
        apply_patch(&mut config, &patch)
            .with_context(|| format!("Failed to apply patch {}", path.display()))?;
        ctx.reporter.info(&format!("Applied {}", path.display()));
    }

    let reference = output.join(REFERENCE_PATH);
    let sample = output.join(SAMPLE_PATH);
    if reference.is_file() && sample.is_file() {
        let tex = std::fs::read_to_string(&reference)
            .with_context(|| format!("Failed to read {}", reference.display()))?;
        let sample = read_plist(&sample).context("Failed to read the sample configuration")?;
        let filled = apply_schema_defaults(&mut config, &sample, &schema::parse(&tex))?;
        debug!(filled, "applied schema defaults");
    }

    save_plist(&config_path, &config, PlistOptions::default())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    ctx.reporter
        .success(&format!("Wrote {}", config_path.display()));
    Ok(config_path)
}

/// Merge each entry's `properties` into its component record.
fn apply_properties(config: &mut efibuild_schema::Value, manifest: &Manifest) {
    for entry in &manifest.entries {
        let Some(properties) = &entry.properties else {
            continue;
        };
        if entry.category == Category::OpenCorePkg {
            continue;
        }
        let filepath = entry.filepath();
        let id = Path::new(&filepath).relative(Path::new(&entry.category.output_dir()));
        if !merge_record(config, entry.category, &id.posix(), properties) {
            warn!(category = %entry.category, name = %entry.name, "no record to apply properties to");
        }
    }
}
