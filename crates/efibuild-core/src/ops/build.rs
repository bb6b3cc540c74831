//! Build phase: fetch every locked source and assemble the output tree.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use efibuild_schema::{BuildVariant, Category};
use futures::{StreamExt, stream};
use tracing::{debug, info, warn};

use super::context::Context;
use crate::cache::Cache;
use crate::config::tables::ACPI_SOURCES_DIR;
use crate::io::download::extract_archive;
use crate::io::fs::{CopyFilter, PathExt, copy, remove};
use crate::lockfile::Lockfile;
use crate::manifest::{Manifest, ManifestEntry};
use crate::package::{
    self, AcpiTable, COMPANION_BRANCH, COMPANION_REPO, Component, Layout, Package, bootloader,
    candidates, collect_tables, find_compiler, layout_bootloader,
};

/// Downloads in flight at once.
const FETCH_CONCURRENCY: usize = 4;

/// Top-level directories of the output tree owned by the build phase.
const OUTPUT_DIRS: [&str; 3] = ["EFI", "Docs", "Utilities"];

#[derive(Debug, Default)]
pub struct BuildReport {
    /// Tagged archive digests of the remote packages, for the lockfile.
    pub checksums: BTreeMap<(Category, String), String>,
    /// Final paths of the placed components.
    pub placed: Vec<PathBuf>,
    /// Directories merged from the companion package.
    pub companion: Vec<String>,
}

/// Fetch the sources in `lockfile`, lay out the bootloader, place every
/// manifest component and validate the result.
///
/// Observed checksums are recorded into `lockfile`; the caller saves it.
///
/// # Errors
///
/// Fails when an entry has no lockfile record, a fetch fails, a checksum
/// differs from the recorded one, or a manifest entry is missing from the
/// assembled tree.
pub async fn build(ctx: &Context, manifest: &Manifest, lockfile: &mut Lockfile) -> Result<BuildReport> {
    ctx.reporter.section("Building");
    let output = ctx.env.output.as_path();

    for entry in &manifest.entries {
        if !entry.is_bundled() && lockfile.get(entry.category, &entry.name).is_none() {
            anyhow::bail!(
                "{}/{} is not in the lockfile; resolve first",
                entry.category,
                entry.name
            );
        }
    }

    let cache = Cache::open(ctx.env.cache_root.as_deref()).context("Failed to open cache")?;
    let downloads = cache.scratch("packages-")?;
    let packages = fetch_all(ctx, lockfile, &downloads).await?;

    let mut report = BuildReport::default();
    for ((category, name), package) in &packages {
        if let Some(checksum) = &package.checksum {
            lockfile
                .record_checksum(*category, name, checksum)
                .with_context(|| format!("Integrity check failed for {category}/{name}"))?;
            report.checksums.insert((*category, name.clone()), checksum.clone());
        }
    }

    let boot = packages
        .values()
        .find(|p| p.category == Category::OpenCorePkg)
        .context("No bootloader package in the lockfile")?;
    let layout = layout_bootloader(&boot.root, manifest.target, &cache.scratch("layout-")?)
        .with_context(|| format!("Failed to lay out {}", boot.name))?;
    if boot.remote {
        report.companion = fetch_companion(ctx, &layout, &downloads).await;
    }

    prepare_output(&layout, output)?;

    let compiler = find_compiler();
    let mut selector = Selector {
        packages: &packages,
        layout: &layout,
        compiler: compiler.as_deref(),
        tables: HashMap::new(),
        used: HashSet::new(),
    };
    let mut components = Vec::new();
    let mut acpi_sources = Vec::new();
    for entry in &manifest.entries {
        if entry.category == Category::OpenCorePkg {
            continue;
        }
        let build = lockfile
            .get(entry.category, &entry.name)
            .map_or_else(|| entry.build.unwrap_or(manifest.build), |l| l.build);
        selector.select(entry, build, &mut components, &mut acpi_sources)?;
    }

    let sources_dir = output.join(ACPI_SOURCES_DIR);
    std::fs::create_dir_all(&sources_dir)?;
    for (stem, source) in &acpi_sources {
        copy(source, &sources_dir.join(format!("{stem}.dsl")), None)?;
    }

    report.placed = package::materialize(output, &components).context("Failed to place components")?;

    let missing = package::validate(output, &manifest.expected_outputs());
    for err in &missing {
        ctx.reporter.error(&err.to_string());
    }
    if let Some(first) = missing.into_iter().next() {
        return Err(first).context("Output tree is incomplete");
    }

    ctx.reporter.success(&format!(
        "Assembled {} components into {}",
        report.placed.len(),
        output.display()
    ));
    Ok(report)
}

async fn fetch_all(
    ctx: &Context,
    lockfile: &Lockfile,
    downloads: &Path,
) -> Result<BTreeMap<(Category, String), Package>> {
    let sources: Vec<_> = lockfile.entries.values().filter(|e| !e.is_bundled()).collect();
    let total = sources.len();
    let client = &ctx.client;

    let mut fetches = stream::iter(sources)
        .map(|entry| async move { (entry, package::fetch(client, downloads, entry).await) })
        .buffer_unordered(FETCH_CONCURRENCY);

    let mut packages = BTreeMap::new();
    while let Some((entry, result)) = fetches.next().await {
        let package =
            result.with_context(|| format!("Failed to fetch {}/{}", entry.category, entry.name))?;
        ctx.reporter.step("Fetching", packages.len() + 1, total);
        packages.insert((entry.category, entry.name.clone()), package);
    }
    info!(packages = packages.len(), "fetched sources");
    Ok(packages)
}

/// Download the companion package and merge it into `layout`. Failures
/// leave the layout as it is.
async fn fetch_companion(ctx: &Context, layout: &Layout, downloads: &Path) -> Vec<String> {
    let url = ctx.catalog.archive_url(COMPANION_REPO, COMPANION_BRANCH);
    let merged = match extract_archive(&ctx.client, &url, downloads, false).await {
        Ok(extraction) => bootloader::merge_companion(layout, extraction.path()),
        Err(e) => Err(e),
    };
    merged.unwrap_or_else(|e| {
        ctx.reporter
            .warning(&format!("Skipping {COMPANION_REPO}: {e}"));
        Vec::new()
    })
}

/// Replace the build-owned part of `output` with the bootloader layout,
/// leaving the component directories empty.
fn prepare_output(layout: &Layout, output: &Path) -> Result<()> {
    for dir in OUTPUT_DIRS {
        remove(&output.join(dir))?;
    }
    let oc = layout.efi().join("OC");
    let skip_components = |dir: &Path, names: &[OsString]| -> Vec<OsString> {
        if dir != oc.as_path() {
            return Vec::new();
        }
        names
            .iter()
            .filter(|n| {
                n.to_str()
                    .is_some_and(|n| Category::COMPONENTS.iter().any(|c| c.as_str() == n))
            })
            .cloned()
            .collect()
    };
    copy(&layout.root, output, Some(&skip_components as CopyFilter<'_>))
        .with_context(|| format!("Failed to copy the bootloader into {}", output.display()))?;
    package::reset_component_dirs(output)?;
    debug!(output = %output.display(), "output tree prepared");
    Ok(())
}

/// Picks the source of every component, searching the entry's own
/// package or, for bundled entries, the layout and every package.
struct Selector<'a> {
    packages: &'a BTreeMap<(Category, String), Package>,
    layout: &'a Layout,
    compiler: Option<&'a Path>,
    /// ACPI tables per searched root.
    tables: HashMap<PathBuf, BTreeMap<String, AcpiTable>>,
    used: HashSet<PathBuf>,
}

impl Selector<'_> {
    fn roots(&self, entry: &ManifestEntry) -> Vec<PathBuf> {
        if entry.is_bundled() {
            std::iter::once(self.layout.root.clone())
                .chain(
                    self.packages
                        .values()
                        .filter(|p| p.category != Category::OpenCorePkg)
                        .map(|p| p.root.clone()),
                )
                .collect()
        } else {
            self.packages
                .get(&(entry.category, entry.name.clone()))
                .map(|p| vec![p.root.clone()])
                .unwrap_or_default()
        }
    }

    fn acpi_tables(&mut self, root: &Path) -> Result<&BTreeMap<String, AcpiTable>> {
        if !self.tables.contains_key(root) {
            let found = collect_tables(root, self.compiler)
                .with_context(|| format!("Failed to collect ACPI tables from {}", root.display()))?;
            self.tables.insert(root.to_path_buf(), found);
        }
        Ok(&self.tables[root])
    }

    /// Source for `name` under `root`. `single` accepts the only candidate
    /// when none matches by name.
    fn find(
        &mut self,
        root: &Path,
        category: Category,
        name: &str,
        build: BuildVariant,
        single: bool,
    ) -> Result<Option<(PathBuf, Option<PathBuf>)>> {
        if category == Category::Acpi {
            let tables = self.acpi_tables(root)?;
            let table = tables
                .get(name)
                .or_else(|| (single && tables.len() == 1).then(|| tables.values().next()).flatten());
            return Ok(table.and_then(|t| t.path.clone().map(|p| (p, t.source.clone()))));
        }
        let found = candidates(root, category, build);
        let pick = found
            .get(name)
            .or_else(|| (single && found.len() == 1).then(|| found.values().next()).flatten());
        Ok(pick.map(|p| (p.clone(), None)))
    }

    fn select(
        &mut self,
        entry: &ManifestEntry,
        build: BuildVariant,
        components: &mut Vec<Component>,
        acpi_sources: &mut Vec<(String, PathBuf)>,
    ) -> Result<()> {
        let wanted = std::iter::once((
            entry.name.clone(),
            entry.filepath(),
            !entry.is_bundled(),
            entry.bundled.clone(),
        ))
        .chain(
            entry
                .bundled
                .iter()
                .map(|b| (b.clone(), entry.category.default_filepath(b), false, Vec::new())),
        );
        let roots = self.roots(entry);

        for (name, filepath, single, plugins) in wanted.collect::<Vec<_>>() {
            let mut chosen = None;
            for root in &roots {
                if let Some(found) = self.find(root, entry.category, &name, build, single)? {
                    chosen = Some(found);
                    break;
                }
            }
            let Some((source, acpi_source)) = chosen else {
                warn!(category = %entry.category, name = %name, "no matching file in any package");
                continue;
            };
            if !self.used.insert(source.clone()) {
                debug!(name = %name, source = %source.display(), "source already placed");
                continue;
            }
            if let Some(dsl) = acpi_source {
                acpi_sources.push((Path::new(&filepath).stem_str().to_string(), dsl));
            }
            debug!(name = %name, source = %source.display(), "selected component");
            components.push(Component {
                category: entry.category,
                name,
                source,
                filepath,
                plugins,
            });
        }
        Ok(())
    }
}
