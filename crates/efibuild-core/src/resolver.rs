//! Specifier resolution.
//!
//! A specifier is classified into one of three [`Resolver`] variants,
//! each of which turns into a download URL or a local path.
//!
//! Compact forms accepted from manifests:
//!
//! ```text
//! acidanthera/Lilu                      latest release
//! acidanthera/Lilu=^1.6.0               release range (alias for #tag=)
//! acidanthera/Lilu#branch=master        newest workflow artifact on a branch
//! acidanthera/Lilu#1a2b3c4              bare hex -> commit, otherwise branch
//! ./acpi/SSDT-EC.dsl                    local file
//! Lilu                                  prebuilt catalog lookup by name
//! ```
//!
//! Canonical forms written to the lockfile are accepted as well, see
//! [`format_resolver`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use efibuild_schema::{BuildVariant, Value, is_range_specifier, resolve_specifier};
use regex::Regex;
use tracing::debug;

use crate::catalog::{RunReference, SourceCatalog};
use crate::error::{Error, Result};

static REPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+/[a-zA-Z0-9._-]+$").expect("repo pattern"));
static COMMIT_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{7}([0-9a-fA-F]{33})?$").expect("sha pattern"));

/// Scheme of canonical remote specifiers.
pub const REMOTE_SCHEME: &str = "github";
/// Scheme of canonical local specifiers.
pub const LOCAL_SCHEME: &str = "file";

/// Named parameters in canonical order.
const PARAM_KEYS: [&str; 4] = ["branch", "commit", "workflow", "path"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRepo {
    /// `owner/name`.
    pub repo: String,
    pub tag: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub workflow: Option<String>,
    /// File inside the repository, fetched raw.
    pub path: Option<String>,
}

impl RemoteRepo {
    fn param(&self, key: &str) -> Option<&String> {
        match key {
            "tag" => self.tag.as_ref(),
            "branch" => self.branch.as_ref(),
            "commit" => self.commit.as_ref(),
            "workflow" => self.workflow.as_ref(),
            "path" => self.path.as_ref(),
            _ => None,
        }
    }

    fn set_param(&mut self, key: &str, value: String) {
        match key {
            "tag" => self.tag = Some(value),
            "branch" => self.branch = Some(value),
            "commit" => self.commit = Some(value),
            "workflow" => self.workflow = Some(value),
            "path" => self.path = Some(value),
            _ => {}
        }
    }

    /// Whether any of `keys` is set.
    pub fn has_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.param(k).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolver {
    RemoteRepo(RemoteRepo),
    /// Lookup in the prebuilt build catalog.
    PrebuiltBinary { name: String, commit: Option<String> },
    LocalPath { name: String, path: PathBuf },
}

impl Resolver {
    /// Public parameters as a deterministic dictionary.
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut out = BTreeMap::new();
        match self {
            Self::RemoteRepo(remote) => {
                out.insert("repo", remote.repo.clone());
                for key in ["tag", "branch", "commit", "workflow", "path"] {
                    if let Some(v) = remote.param(key) {
                        out.insert(key, v.clone());
                    }
                }
            }
            Self::PrebuiltBinary { name, commit } => {
                out.insert("name", name.clone());
                if let Some(c) = commit {
                    out.insert("commit", c.clone());
                }
            }
            Self::LocalPath { name, path } => {
                out.insert("name", name.clone());
                out.insert("path", path.display().to_string());
            }
        }
        out
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The resolver with ranges replaced by concrete values.
    pub resolver: Resolver,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub commit: Option<String>,
}

impl Resolved {
    /// Canonical resolution string.
    pub fn resolution(&self) -> String {
        format_resolver(&self.resolver)
    }
}

/// Parsed `#k=v` / `&k=v` / `=tag` / `#ref` suffixes. Named parameters win
/// over bare ones.
#[derive(Debug, Default)]
struct Suffix {
    named: BTreeMap<String, String>,
    bare: BTreeMap<String, String>,
}

fn parse_suffix(spec: &str, rest: &str) -> Result<Suffix> {
    let mut suffix = Suffix::default();
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, c) in rest.char_indices().skip(1) {
        if matches!(c, '#' | '&') {
            segments.push(&rest[start..i]);
            start = i;
        }
    }
    if !rest.is_empty() {
        segments.push(&rest[start..]);
    }

    for segment in segments {
        let (marker, body) = segment.split_at(1);
        if body.is_empty() {
            return Err(Error::SpecifierSyntax(spec.to_string()));
        }
        match (marker, body.split_once('=')) {
            ("=" | ":", _) => {
                suffix.bare.insert("tag".into(), body.to_string());
            }
            ("#" | "&", Some((key, value))) => {
                if key != "tag" && !PARAM_KEYS.contains(&key) {
                    return Err(Error::SpecifierSyntax(spec.to_string()));
                }
                suffix.named.insert(key.to_string(), value.to_string());
            }
            ("#", None) => {
                let key = if COMMIT_SHA.is_match(body) { "commit" } else { "branch" };
                suffix.bare.insert(key.into(), body.to_string());
            }
            _ => return Err(Error::SpecifierSyntax(spec.to_string())),
        }
    }
    Ok(suffix)
}

fn looks_like_path(s: &str) -> bool {
    s.starts_with(['/', '.', '~']) || Path::new(s).is_absolute()
}

fn expand_path(s: &str, base_dir: &Path) -> PathBuf {
    let path = match s.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from(s), |home| PathBuf::from(home).join(rest)),
        None => PathBuf::from(s),
    };
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Build a resolver for manifest entry `name`.
///
/// `entry` is a specifier string or a mapping with `specifier` plus
/// optional `tag`, `branch`, `commit`, `workflow` and `path` overrides.
/// Relative local paths are taken relative to `base_dir`.
pub fn parse_specifier(name: &str, entry: &Value, base_dir: &Path) -> Result<Resolver> {
    let (spec, overrides) = match entry {
        Value::String(s) => (s.as_str(), None),
        Value::Dict(d) => (
            d.get("specifier").and_then(Value::as_str).unwrap_or(name),
            Some(d),
        ),
        _ => return Err(Error::SpecifierSyntax(format!("{name}: {}", entry.type_name()))),
    };
    let spec = spec.trim();
    if spec.is_empty() || spec == "*" {
        return Err(Error::SpecifierSyntax(spec.to_string()));
    }

    // Canonical `<base>@file:<path>` / `<base>@github[:tag]...`
    let local_marker = format!("@{LOCAL_SCHEME}:");
    if let Some((base, path)) = spec.split_once(&local_marker) {
        return Ok(Resolver::LocalPath {
            name: base.to_string(),
            path: expand_path(path, base_dir),
        });
    }
    let remote_marker = format!("@{REMOTE_SCHEME}");
    let (base, rest, canonical) = match spec.split_once(&remote_marker) {
        Some((base, rest)) => (base, rest, true),
        None => {
            let local = expand_path(spec, base_dir);
            if (looks_like_path(spec) || !REPO.is_match(spec)) && local.exists() {
                return Ok(Resolver::LocalPath {
                    name: name.to_string(),
                    path: local,
                });
            }
            if looks_like_path(spec) {
                debug!(name, specifier = spec, "no such path, looking up a prebuilt binary");
                return Ok(Resolver::PrebuiltBinary {
                    name: name.to_string(),
                    commit: overrides
                        .and_then(|d| d.get("commit"))
                        .and_then(Value::as_str)
                        .map(String::from),
                });
            }
            let split = spec.find(['=', '#', '&']).unwrap_or(spec.len());
            (&spec[..split], &spec[split..], false)
        }
    };
    let suffix = parse_suffix(spec, rest)?;

    if !REPO.is_match(base) {
        if canonical || base == name || !base.contains('/') {
            let mut params = suffix.bare;
            params.extend(suffix.named);
            let commit = overrides
                .and_then(|d| d.get("commit"))
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| params.remove("commit"));
            return Ok(Resolver::PrebuiltBinary {
                name: if canonical { base.to_string() } else { name.to_string() },
                commit,
            });
        }
        return Err(Error::SpecifierSyntax(spec.to_string()));
    }

    let mut remote = RemoteRepo {
        repo: base.to_string(),
        ..RemoteRepo::default()
    };
    for (key, value) in suffix.bare.into_iter().chain(suffix.named) {
        remote.set_param(&key, value);
    }
    if let Some(d) = overrides {
        for key in ["tag", "branch", "commit", "workflow", "path"] {
            if let Some(v) = d.get(key).and_then(Value::as_str) {
                remote.set_param(key, v.to_string());
            }
        }
    }
    Ok(Resolver::RemoteRepo(remote))
}

/// Canonical string of a resolver, stable enough to key the lockfile:
/// `owner/repo@github[:tag][#k=v][&k=v]`, `name@github[#commit=sha]` or
/// `name@file:/abs/path`.
pub fn format_resolver(resolver: &Resolver) -> String {
    match resolver {
        Resolver::RemoteRepo(remote) => {
            let mut out = format!("{}@{REMOTE_SCHEME}", remote.repo);
            if let Some(tag) = &remote.tag {
                out.push(':');
                out.push_str(tag);
            }
            let mut sep = '#';
            for key in PARAM_KEYS {
                if let Some(value) = remote.param(key) {
                    out.push(sep);
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                    sep = '&';
                }
            }
            out
        }
        Resolver::PrebuiltBinary { name, commit } => match commit {
            Some(sha) => format!("{name}@{REMOTE_SCHEME}#commit={sha}"),
            None => format!("{name}@{REMOTE_SCHEME}"),
        },
        Resolver::LocalPath { name, path } => {
            format!("{name}@{LOCAL_SCHEME}:{}", path.display())
        }
    }
}

/// Resolve to a URL or local path.
///
/// With `strict`, a missing local path is [`Error::PathNotFound`].
pub async fn resolve(
    catalog: &dyn SourceCatalog,
    resolver: &Resolver,
    build: BuildVariant,
    strict: bool,
) -> Result<Resolved> {
    match resolver {
        Resolver::RemoteRepo(remote) => resolve_remote(catalog, remote, build).await,
        Resolver::PrebuiltBinary { name, commit } => {
            let index = catalog.prebuilt_catalog().await?;
            let unresolved = || Error::VersionUnresolved {
                name: name.clone(),
                specifier: commit.clone().unwrap_or_else(|| "latest".into()),
            };
            let found = match commit {
                Some(sha) => index.find(name, sha),
                None => index.latest(name),
            }
            .ok_or_else(unresolved)?;
            let url = found.link(build).ok_or_else(unresolved)?;
            Ok(Resolved {
                resolver: Resolver::PrebuiltBinary {
                    name: name.clone(),
                    commit: Some(found.commit.clone()),
                },
                url: Some(url.to_string()),
                path: None,
                version: found.version.clone(),
                commit: Some(found.commit.clone()),
            })
        }
        Resolver::LocalPath { name, path } => {
            let canonical = match std::fs::canonicalize(path) {
                Ok(p) => p,
                Err(_) if strict => return Err(Error::PathNotFound(path.clone())),
                Err(_) => path.clone(),
            };
            Ok(Resolved {
                resolver: Resolver::LocalPath {
                    name: name.clone(),
                    path: canonical.clone(),
                },
                url: None,
                path: Some(canonical),
                version: None,
                commit: None,
            })
        }
    }
}

async fn resolve_remote(
    catalog: &dyn SourceCatalog,
    remote: &RemoteRepo,
    build: BuildVariant,
) -> Result<Resolved> {
    let mut concrete = remote.clone();
    let pinned_elsewhere = remote.has_any(&["branch", "commit", "workflow", "path"]);

    let needs_tags = match &remote.tag {
        Some(tag) => is_range_specifier(tag),
        None => !pinned_elsewhere,
    };
    if needs_tags {
        let wanted = remote.tag.clone().unwrap_or_else(|| "latest".into());
        let tags = catalog.tag_names(&remote.repo).await?;
        let tag = resolve_specifier(&tags, &wanted).ok_or_else(|| Error::VersionUnresolved {
            name: remote.repo.clone(),
            specifier: wanted.clone(),
        })?;
        debug!(repo = %remote.repo, specifier = %wanted, tag = %tag, "resolved tag");
        concrete.tag = Some(tag.clone());
    }

    let url = if let Some(path) = &concrete.path {
        let reference = concrete
            .tag
            .as_deref()
            .or(concrete.commit.as_deref())
            .or(concrete.branch.as_deref())
            .unwrap_or("HEAD");
        catalog.file_url(&concrete.repo, path, reference)
    } else if concrete.has_any(&["branch", "commit", "workflow"]) {
        let reference = match (&concrete.commit, &concrete.branch) {
            (Some(sha), _) => RunReference::Commit(sha.clone()),
            (None, Some(branch)) => RunReference::Branch(branch.clone()),
            (None, None) => RunReference::Branch("master".into()),
        };
        catalog
            .artifact_url(&concrete.repo, &reference, concrete.workflow.as_deref(), build)
            .await?
    } else {
        let tag = concrete.tag.clone().unwrap_or_default();
        catalog.release_asset_url(&concrete.repo, &tag, build).await?
    };

    Ok(Resolved {
        version: concrete.tag.clone(),
        commit: concrete.commit.clone(),
        resolver: Resolver::RemoteRepo(concrete),
        url: Some(url),
        path: None,
    })
}
