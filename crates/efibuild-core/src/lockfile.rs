//! Lockfile: the persisted, canonical resolution of a manifest.
//!
//! ```text
//! ---
//! version: 0.1.0
//! manifest: 1.0.2
//! timestamps:
//!   dortania/build-repo: '2024-05-01T10:00:00Z'
//! ---
//! '#Revision':
//!   algorithm: SHA256
//!   manifest: 3b1f...
//! Kexts:
//!   Lilu:
//!     resolution: acidanthera/Lilu@github:1.6.8
//!     ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use efibuild_schema::{BuildVariant, Category, DIGEST_ALGORITHM, Dict, Kind, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::SourceCatalog;
use crate::error::{Error, Result};
use crate::io::digest::{digest_bytes, tagged};
use crate::manifest::{BUNDLED, Manifest, ManifestEntry};
use crate::parsers::manifest::{self as doc, WriteOptions};
use crate::reporter::{ProgressExt, Reporter};
use crate::resolver::{format_resolver, parse_specifier, resolve};

/// Key of the revision section.
pub const REVISION_KEY: &str = "#Revision";

/// Tool version recorded in the frontmatter.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    #[serde(skip)]
    pub name: String,
    pub resolution: String,
    pub specifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub build: BuildVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub revision: String,
    pub kind: Kind,
    #[serde(rename = "__filepath")]
    pub filepath: String,
    #[serde(rename = "__category")]
    pub category: Category,
}

impl LockEntry {
    /// Whether the entry points into a sibling package.
    pub fn is_bundled(&self) -> bool {
        self.specifier == BUNDLED
    }

    fn to_value(&self) -> Result<Value> {
        Ok(Value::from_json(&serde_json::to_value(self)?))
    }

    fn from_value(name: &str, value: &Value) -> Result<Self> {
        let mut entry: Self = serde_json::from_value(value.to_json())?;
        entry.name = name.to_string();
        Ok(entry)
    }
}

/// Revision digest of a resolution and its source.
pub fn revision(resolution: &str, source: &str) -> String {
    tagged(&digest_bytes(format!("{resolution}{source}").as_bytes()))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lockfile {
    pub frontmatter: Dict,
    pub revision: Option<Dict>,
    pub entries: BTreeMap<(Category, String), LockEntry>,
}

impl Lockfile {
    /// Read `path`; a missing file is an empty lockfile.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let document = doc::parse(text, &[])?;
        let mut lock = Self {
            frontmatter: match document.frontmatter {
                Some(Value::Dict(d)) => d,
                _ => Dict::new(),
            },
            ..Self::default()
        };
        let Value::Dict(sections) = document.body else {
            return Ok(lock);
        };
        for (section, items) in sections {
            if section == REVISION_KEY {
                lock.revision = items.as_dict().cloned();
                continue;
            }
            let category: Category = section.parse().map_err(Error::SchemaViolation)?;
            let Value::Dict(items) = items else { continue };
            for (name, value) in &items {
                let entry = LockEntry::from_value(name, value)?;
                lock.entries.insert((category, name.clone()), entry);
            }
        }
        Ok(lock)
    }

    /// Serialize with `#Revision` first, then the categories in order and
    /// names sorted.
    pub fn to_document(&self) -> Result<String> {
        let mut body = Dict::new();
        if let Some(rev) = &self.revision {
            body.insert(REVISION_KEY.to_string(), Value::Dict(rev.clone()));
        }
        for ((category, name), entry) in &self.entries {
            let section = body
                .entry(category.as_str().to_string())
                .or_insert_with(Value::dict);
            if let Some(items) = section.as_dict_mut() {
                items.insert(name.clone(), entry.to_value()?);
            }
        }
        let front = Value::Dict(self.frontmatter.clone());
        let front = (!self.frontmatter.is_empty()).then_some(&front);
        Ok(doc::write(
            &Value::Dict(body),
            front,
            WriteOptions {
                annotated: false,
                sort_keys: false,
            },
        ))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_document()?)?;
        Ok(())
    }

    pub fn get(&self, category: Category, name: &str) -> Option<&LockEntry> {
        self.entries.get(&(category, name.to_string()))
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &LockEntry> {
        self.entries
            .iter()
            .filter(move |((c, _), _)| *c == category)
            .map(|(_, e)| e)
    }

    /// Record the digest of the manifest the lockfile was produced from.
    pub fn set_manifest_revision(&mut self, manifest_digest: &str) {
        let mut rev = Dict::new();
        rev.insert("algorithm".into(), Value::from(DIGEST_ALGORITHM));
        rev.insert("manifest".into(), Value::from(manifest_digest));
        self.revision = Some(rev);
    }

    /// Store the checksum the build phase observed.
    ///
    /// # Errors
    ///
    /// [`Error::Integrity`] when the entry already carries a different
    /// checksum.
    pub fn record_checksum(&mut self, category: Category, name: &str, checksum: &str) -> Result<()> {
        let Some(entry) = self.entries.get_mut(&(category, name.to_string())) else {
            return Ok(());
        };
        match &entry.checksum {
            Some(expected) if expected != checksum => Err(Error::Integrity {
                expected: expected.clone(),
                actual: checksum.to_string(),
            }),
            _ => {
                entry.checksum = Some(checksum.to_string());
                Ok(())
            }
        }
    }

    /// Drop entries that are no longer in `manifest`.
    pub fn prune(&mut self, manifest: &Manifest) -> Vec<LockEntry> {
        let stale: Vec<_> = self
            .entries
            .keys()
            .filter(|(category, name)| !manifest.contains(*category, name))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Re-resolve every entry already in the lockfile, picking up new
    /// releases, branch heads and catalog builds.
    pub update: bool,
    /// Re-resolve everything and forget recorded checksums.
    pub force: bool,
    /// Fail local entries whose path does not exist.
    pub strict: bool,
}

#[derive(Debug, Default)]
pub struct ResolveReport {
    pub resolved: Vec<(Category, String)>,
    pub skipped: Vec<(Category, String)>,
    /// Entries whose resolution failed with a recoverable error.
    pub failures: Vec<(Category, String, Error)>,
    pub pruned: Vec<LockEntry>,
}

fn bundled_entry(entry: &ManifestEntry, build: BuildVariant) -> LockEntry {
    LockEntry {
        name: entry.name.clone(),
        resolution: BUNDLED.to_string(),
        specifier: BUNDLED.to_string(),
        version: None,
        commit: None,
        url: None,
        path: None,
        build,
        checksum: None,
        revision: revision(BUNDLED, ""),
        kind: entry.category.kind(),
        filepath: entry.filepath(),
        category: entry.category,
    }
}

/// Bring `lock` in line with `manifest`: resolve new or changed entries,
/// keep the rest, prune the ones that disappeared.
///
/// Recoverable failures are recorded in the report and resolution
/// continues; anything else (rate limiting, transport errors) aborts.
pub async fn resolve_manifest(
    lock: &mut Lockfile,
    manifest: &Manifest,
    catalog: &dyn SourceCatalog,
    opts: ResolveOptions,
    reporter: &dyn Reporter,
) -> Result<ResolveReport> {
    let mut report = ResolveReport::default();

    for entry in manifest.entries.iter().progress(reporter, "Resolving") {
        let key = (entry.category, entry.name.clone());
        let build = entry.build.unwrap_or(manifest.build);

        if entry.is_bundled() {
            lock.entries.insert(key.clone(), bundled_entry(entry, build));
            report.skipped.push(key);
            continue;
        }

        let resolver = match parse_specifier(&entry.name, &entry.specifier, &manifest.base_dir) {
            Ok(r) => r,
            Err(e) => {
                reporter.warning(&format!("{}/{}: {e}", entry.category, entry.name));
                report.failures.push((key.0, key.1, e));
                continue;
            }
        };
        let specifier = format_resolver(&resolver);

        if let Some(existing) = lock.entries.get(&key) {
            let unchanged = existing.specifier == specifier
                && existing.build == build
                && existing.filepath == entry.filepath();
            let refresh = opts.force || opts.update;
            if unchanged && !refresh {
                debug!(entry = %entry.name, "lockfile entry is current");
                report.skipped.push(key);
                continue;
            }
        }

        let resolved = match resolve(catalog, &resolver, build, opts.strict).await {
            Ok(r) => r,
            Err(e) if e.is_recoverable() => {
                reporter.warning(&format!("{}/{}: {e}", entry.category, entry.name));
                report.failures.push((key.0, key.1, e));
                continue;
            }
            Err(e) => return Err(e),
        };

        let resolution = resolved.resolution();
        let url = resolved.url.clone();
        let path = resolved.path.as_ref().map(|p| p.display().to_string());
        let source = url.as_deref().or(path.as_deref()).unwrap_or_default();
        let previous = lock.entries.get(&key);
        let checksum = previous
            .filter(|p| !opts.force && p.url == url && p.path == path)
            .and_then(|p| p.checksum.clone());

        info!(entry = %entry.name, resolution = %resolution, "resolved");
        lock.entries.insert(
            key.clone(),
            LockEntry {
                name: entry.name.clone(),
                revision: revision(&resolution, source),
                resolution,
                specifier,
                version: resolved.version,
                commit: resolved.commit,
                url,
                path,
                build,
                checksum,
                kind: entry.category.kind(),
                filepath: entry.filepath(),
                category: entry.category,
            },
        );
        report.resolved.push(key);
    }

    report.pruned = lock.prune(manifest);
    for gone in &report.pruned {
        reporter.info(&format!("Removed {}/{} from lockfile", gone.category, gone.name));
    }

    lock.frontmatter
        .insert("version".into(), Value::from(TOOL_VERSION));
    if let Some(v) = &manifest.version {
        lock.frontmatter.insert("manifest".into(), Value::from(v.as_str()));
    }
    if !report.resolved.is_empty() {
        let stamps = catalog.timestamps().await;
        if !stamps.is_empty() {
            let mut merged = lock
                .frontmatter
                .get("timestamps")
                .and_then(Value::as_dict)
                .cloned()
                .unwrap_or_default();
            for (remote, stamp) in stamps {
                merged.insert(remote, Value::from(stamp));
            }
            lock.frontmatter.insert("timestamps".into(), Value::Dict(merged));
        }
    }
    Ok(report)
}
