//! Prebuilt build catalog (`config.json` of the build repository) and its
//! memoization window.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use efibuild_schema::BuildVariant;
use serde::Deserialize;

/// Seconds after which a fetched catalog is checked for updates.
pub const STALE_AFTER_SECS: i64 = 30 * 60;

/// One published build of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrebuiltBuild {
    pub commit: String,
    pub version: Option<String>,
    pub release: Option<String>,
    pub debug: Option<String>,
}

impl PrebuiltBuild {
    /// Download link for `build`; debug-flavoured variants fall back to the
    /// release link when no debug build was published.
    pub fn link(&self, build: BuildVariant) -> Option<&str> {
        match build {
            BuildVariant::Release => self.release.as_deref(),
            BuildVariant::Debug | BuildVariant::Noopt => {
                self.debug.as_deref().or(self.release.as_deref())
            }
        }
    }
}

/// Snapshot of the catalog: builds per name, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrebuiltCatalog {
    pub builds: BTreeMap<String, Vec<PrebuiltBuild>>,
    pub last_updated: DateTime<Utc>,
}

impl PrebuiltCatalog {
    pub fn latest(&self, name: &str) -> Option<&PrebuiltBuild> {
        self.builds.get(name).and_then(|b| b.first())
    }

    /// Build of `name` at `commit`; abbreviated shas match by prefix.
    pub fn find(&self, name: &str, commit: &str) -> Option<&PrebuiltBuild> {
        self.builds
            .get(name)?
            .iter()
            .find(|b| b.commit.starts_with(commit))
    }
}

#[derive(Deserialize)]
struct RawEntry {
    versions: Vec<RawVersion>,
}

#[derive(Deserialize)]
struct RawVersion {
    commit: RawCommit,
    version: Option<String>,
    #[serde(default)]
    links: RawLinks,
}

#[derive(Deserialize)]
struct RawCommit {
    sha: String,
}

#[derive(Deserialize, Default)]
struct RawLinks {
    release: Option<String>,
    debug: Option<String>,
}

/// Parse `config.json`. Top-level keys that do not look like build entries
/// are skipped.
pub fn parse_catalog(json: &serde_json::Value) -> BTreeMap<String, Vec<PrebuiltBuild>> {
    let Some(object) = json.as_object() else {
        return BTreeMap::new();
    };
    object
        .iter()
        .filter_map(|(name, entry)| {
            let raw = RawEntry::deserialize(entry).ok()?;
            let builds = raw
                .versions
                .into_iter()
                .map(|v| PrebuiltBuild {
                    commit: v.commit.sha,
                    version: v.version,
                    release: v.links.release,
                    debug: v.links.debug,
                })
                .collect();
            Some((name.clone(), builds))
        })
        .collect()
}

/// Memoized catalog state.
#[derive(Debug, Default)]
pub struct PrebuiltCache {
    last_fetched: Option<DateTime<Utc>>,
    latest_timestamp: Option<DateTime<Utc>>,
    builds: Option<BTreeMap<String, Vec<PrebuiltBuild>>>,
}

impl PrebuiltCache {
    /// Whether the remote timestamp must be consulted at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (&self.builds, self.last_fetched) {
            (Some(_), Some(fetched)) => now - fetched >= TimeDelta::seconds(STALE_AFTER_SECS),
            _ => true,
        }
    }

    /// Whether the catalog body must be downloaded given the remote
    /// timestamp.
    pub fn needs_catalog(&self, remote: DateTime<Utc>) -> bool {
        self.builds.is_none() || self.latest_timestamp.is_none_or(|ts| remote > ts)
    }

    /// Record that the timestamp was checked and nothing changed.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_fetched = Some(now);
    }

    pub fn store(
        &mut self,
        now: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        builds: BTreeMap<String, Vec<PrebuiltBuild>>,
    ) {
        self.last_fetched = Some(now);
        self.latest_timestamp = Some(timestamp);
        self.builds = Some(builds);
    }

    pub fn snapshot(&self) -> Option<PrebuiltCatalog> {
        Some(PrebuiltCatalog {
            builds: self.builds.clone()?,
            last_updated: self.latest_timestamp?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "Lilu": { "versions": [
                { "commit": { "sha": "abcdef1234" }, "version": "1.6.9",
                  "links": { "release": "https://x/Lilu-R.zip", "debug": "https://x/Lilu-D.zip" } },
                { "commit": { "sha": "1234567890" }, "version": "1.6.8",
                  "links": { "release": "https://x/Lilu-old.zip" } }
            ]},
            "_meta": "not an entry"
        })
    }

    #[test]
    fn test_parse_catalog() {
        let builds = parse_catalog(&sample());
        assert_eq!(builds.len(), 1);
        let catalog = PrebuiltCatalog {
            builds,
            last_updated: Utc::now(),
        };
        let latest = catalog.latest("Lilu").unwrap();
        assert_eq!(latest.version.as_deref(), Some("1.6.9"));
        assert_eq!(latest.link(BuildVariant::Debug), Some("https://x/Lilu-D.zip"));

        let old = catalog.find("Lilu", "1234567").unwrap();
        assert_eq!(old.link(BuildVariant::Debug), Some("https://x/Lilu-old.zip"));
        assert!(catalog.find("Lilu", "ffff").is_none());
    }

    #[test]
    fn test_staleness_window() {
        let mut cache = PrebuiltCache::default();
        let t0 = Utc::now();
        assert!(cache.is_stale(t0));

        cache.store(t0, t0, parse_catalog(&sample()));
        assert!(!cache.is_stale(t0 + TimeDelta::minutes(29)));
        assert!(cache.is_stale(t0 + TimeDelta::minutes(30)));

        assert!(!cache.needs_catalog(t0));
        assert!(cache.needs_catalog(t0 + TimeDelta::seconds(1)));
        assert!(cache.snapshot().is_some());
    }
}
