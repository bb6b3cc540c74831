//! Kernel extension metadata and load ordering.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use efibuild_schema::{Comparator, Value, compare, minimum_version};

use crate::error::{Error, Result};
use crate::graph::toposort;
use crate::parsers::plist::read_plist;

/// Identifier prefix of platform-vendor bundles, never shipped in the tree.
const VENDOR_PREFIX: &str = "com.apple.";

/// Metadata read from a bundle's `Info.plist`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KextInfo {
    pub identifier: String,
    pub version: Option<String>,
    pub executable: Option<String>,
    /// Library identifier -> minimum version.
    pub dependencies: BTreeMap<String, String>,
    /// `Info.plist` path relative to the bundle.
    pub plist_path: String,
    /// Kernel range the entry is enabled for, when configured.
    pub min_kernel: Option<String>,
    pub max_kernel: Option<String>,
}

impl KextInfo {
    /// Build from a parsed `Info.plist`.
    pub fn from_plist(info: &Value, plist_path: &str) -> Result<Self> {
        let text = |key: &str| info.get(key).and_then(Value::as_str).map(String::from);
        let identifier = text("CFBundleIdentifier").ok_or_else(|| {
            Error::SchemaViolation(format!("{plist_path}: missing CFBundleIdentifier"))
        })?;
        let dependencies = info
            .get("OSBundleLibraries")
            .and_then(Value::as_dict)
            .map(|libs| {
                libs.iter()
                    .filter(|(id, _)| !id.starts_with(VENDOR_PREFIX) && **id != identifier)
                    .map(|(id, v)| (id.clone(), v.as_str().unwrap_or("0").to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            version: text("CFBundleVersion").or_else(|| text("CFBundleShortVersionString")),
            executable: text("CFBundleExecutable"),
            identifier,
            dependencies,
            plist_path: plist_path.to_string(),
            ..Self::default()
        })
    }

    /// Executable path relative to the bundle.
    pub fn executable_path(&self) -> Option<String> {
        self.executable
            .as_ref()
            .map(|exe| format!("Contents/MacOS/{exe}"))
    }

    fn kernel_overlaps(&self, other: &Self) -> bool {
        let below = |min: &Option<String>, max: &Option<String>| match (min, max) {
            (Some(lo), Some(hi)) => compare(lo, hi, Comparator::Le),
            _ => true,
        };
        below(&self.min_kernel, &other.max_kernel) && below(&other.min_kernel, &self.max_kernel)
    }
}

/// Read the metadata of the bundle at `bundle`.
pub fn read_kext(bundle: &Path) -> Result<KextInfo> {
    for relative in ["Contents/Info.plist", "Info.plist"] {
        let candidate = bundle.join(relative);
        if candidate.is_file() {
            return KextInfo::from_plist(&read_plist(&candidate)?, relative);
        }
    }
    Err(Error::PathNotFound(bundle.join("Contents/Info.plist")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KextOrder {
    /// Kext names in load order.
    pub order: Vec<String>,
    /// Kext name -> minimum version its consumers need, as a caret range.
    pub minimums: BTreeMap<String, Option<String>>,
    /// Identifier -> kext names sharing it with overlapping kernel ranges.
    pub duplicates: BTreeMap<String, Vec<String>>,
    /// `(kext name, identifier)` for dependencies no kext provides.
    pub unresolved: Vec<(String, String)>,
}

/// Load order over `kexts` (name -> metadata).
///
/// Nodes are pre-sorted by descending fan-in, descending fan-out, then
/// name, released wave by wave, and kexts with neither dependencies nor
/// dependents are moved to the end.
///
/// # Errors
///
/// [`Error::DependencyCycle`] when bundles depend on each other.
pub fn sort_dependencies(kexts: &BTreeMap<String, KextInfo>) -> Result<KextOrder> {
    let mut by_identifier: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, info) in kexts {
        by_identifier
            .entry(info.identifier.as_str())
            .or_default()
            .push(name.as_str());
    }

    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut fan_in: BTreeMap<&str, usize> = BTreeMap::new();
    let mut unresolved = Vec::new();
    for (name, info) in kexts {
        let targets = edges.entry(name.clone()).or_default();
        for id in info.dependencies.keys() {
            match by_identifier.get(id.as_str()) {
                Some(providers) => {
                    for provider in providers.iter().filter(|p| **p != name.as_str()) {
                        if targets.insert((*provider).to_string()) {
                            *fan_in.entry(*provider).or_default() += 1;
                        }
                    }
                }
                None => unresolved.push((name.clone(), id.clone())),
            }
        }
    }

    let mut nodes: Vec<&String> = kexts.keys().collect();
    nodes.sort_by_key(|name| {
        let out = &edges[name.as_str()];
        (
            Reverse(fan_in.get(name.as_str()).copied().unwrap_or_default()),
            Reverse(out.len()),
            (*name).clone(),
            out.iter().cloned().collect::<Vec<_>>(),
        )
    });
    let nodes: Vec<String> = nodes.into_iter().cloned().collect();

    let sorted = toposort(&nodes, &edges)?;
    let (mut order, isolated): (Vec<_>, Vec<_>) = sorted.into_iter().partition(|name| {
        !edges[name.as_str()].is_empty() || fan_in.contains_key(name.as_str())
    });
    order.extend(isolated);

    let mut duplicates = BTreeMap::new();
    for (id, names) in &by_identifier {
        let overlapping: BTreeSet<&str> = names
            .iter()
            .enumerate()
            .flat_map(|(i, a)| names[i + 1..].iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| kexts[*a].kernel_overlaps(&kexts[*b]))
            .flat_map(|(a, b)| [a, b])
            .collect();
        if !overlapping.is_empty() {
            duplicates.insert(
                (*id).to_string(),
                overlapping.into_iter().map(String::from).collect(),
            );
        }
    }

    Ok(KextOrder {
        order,
        minimums: minimum_versions(kexts),
        duplicates,
        unresolved,
    })
}

/// For each kext, the highest minimum any other kext requests of it.
pub fn minimum_versions(kexts: &BTreeMap<String, KextInfo>) -> BTreeMap<String, Option<String>> {
    kexts
        .iter()
        .map(|(name, info)| {
            let requests = kexts
                .values()
                .filter_map(|consumer| consumer.dependencies.get(&info.identifier))
                .map(String::as_str);
            (name.clone(), minimum_version(requests))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::dict;

    fn kext(id: &str, deps: &[(&str, &str)]) -> KextInfo {
        KextInfo {
            identifier: id.to_string(),
            dependencies: deps
                .iter()
                .map(|(d, v)| ((*d).to_string(), (*v).to_string()))
                .collect(),
            ..KextInfo::default()
        }
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_library_first_and_minimum() {
        let kexts = BTreeMap::from([
            ("A".to_string(), kext("com.x.A", &[("com.x.L", "1.0")])),
            ("B".to_string(), kext("com.x.B", &[("com.x.L", "1.2")])),
            ("L".to_string(), kext("com.x.L", &[])),
        ]);
        let result = sort_dependencies(&kexts).unwrap();
        assert!(position(&result.order, "L") < position(&result.order, "A"));
        assert!(position(&result.order, "L") < position(&result.order, "B"));
        assert_eq!(result.minimums["L"].as_deref(), Some("^1.2.0"));
        assert_eq!(result.minimums["A"], None);
    }

    #[test]
    fn test_isolated_kexts_go_last() {
        let kexts = BTreeMap::from([
            ("AAA".to_string(), kext("com.x.AAA", &[])),
            ("Lilu".to_string(), kext("as.vit9696.Lilu", &[])),
            ("WhateverGreen".to_string(), kext("as.vit9696.WEG", &[("as.vit9696.Lilu", "1.2.0")])),
            ("VirtualSMC".to_string(), kext("as.vit9696.VirtualSMC", &[("as.vit9696.Lilu", "1.2.0")])),
            ("SMCProcessor".to_string(), kext("as.vit9696.SMCProcessor", &[
                ("as.vit9696.VirtualSMC", "1.0.0"),
                ("as.vit9696.Lilu", "1.2.0"),
            ])),
        ]);
        let result = sort_dependencies(&kexts).unwrap();
        assert_eq!(result.order.first().map(String::as_str), Some("Lilu"));
        assert_eq!(result.order.last().map(String::as_str), Some("AAA"));
        for (consumer, info) in &kexts {
            for id in info.dependencies.keys() {
                let provider = kexts.iter().find(|(_, k)| &k.identifier == id).unwrap().0;
                assert!(position(&result.order, provider) < position(&result.order, consumer));
            }
        }
    }

    #[test]
    fn test_cycle_and_unresolved() {
        let cyclic = BTreeMap::from([
            ("A".to_string(), kext("a", &[("b", "1")])),
            ("B".to_string(), kext("b", &[("a", "1")])),
        ]);
        assert!(matches!(
            sort_dependencies(&cyclic),
            Err(Error::DependencyCycle { .. })
        ));

        let dangling = BTreeMap::from([("A".to_string(), kext("a", &[("missing", "1")]))]);
        let result = sort_dependencies(&dangling).unwrap();
        assert_eq!(result.unresolved, vec![("A".to_string(), "missing".to_string())]);
        assert_eq!(result.order, vec!["A".to_string()]);
    }

    #[test]
    fn test_duplicates_respect_kernel_ranges() {
        let mut a = kext("com.x.Same", &[]);
        let mut b = kext("com.x.Same", &[]);
        let kexts = BTreeMap::from([("A".to_string(), a.clone()), ("B".to_string(), b.clone())]);
        assert_eq!(sort_dependencies(&kexts).unwrap().duplicates["com.x.Same"], vec!["A", "B"]);

        a.max_kernel = Some("19.99.99".into());
        b.min_kernel = Some("20.0.0".into());
        let kexts = BTreeMap::from([("A".to_string(), a), ("B".to_string(), b)]);
        assert!(sort_dependencies(&kexts).unwrap().duplicates.is_empty());
    }

    #[test]
    fn test_from_plist_filters_vendor_and_self() {
        let info = dict! {
            "CFBundleIdentifier" => "as.vit9696.Lilu",
            "CFBundleVersion" => "1.6.8",
            "CFBundleExecutable" => "Lilu",
            "OSBundleLibraries" => dict! {
                "com.apple.kpi.bsd" => "12.0.0",
                "as.vit9696.Lilu" => "1.0.0",
                "as.lvs1974.Other" => "1.1",
            },
        };
        let k = KextInfo::from_plist(&info, "Contents/Info.plist").unwrap();
        assert_eq!(k.dependencies.keys().collect::<Vec<_>>(), vec!["as.lvs1974.Other"]);
        assert_eq!(k.executable_path().as_deref(), Some("Contents/MacOS/Lilu"));
    }
}
