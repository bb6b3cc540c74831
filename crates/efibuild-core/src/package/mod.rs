//! Fetching resolved entries and assembling the output tree.

pub mod acpi;
pub mod bootloader;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use efibuild_schema::{BuildVariant, Category};
use reqwest::Client;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::io::digest::tagged;
use crate::io::download::extract_archive;
use crate::io::fs::{PathExt, copy, move_path, remove};
use crate::lockfile::LockEntry;

pub use acpi::{AcpiTable, collect_tables, find_compiler};
pub use bootloader::{COMPANION_BRANCH, COMPANION_REPO, Layout, layout_bootloader};

/// An unpacked source in the cache.
#[derive(Debug, Clone)]
pub struct Package {
    pub category: Category,
    pub name: String,
    pub root: PathBuf,
    /// Tagged digest of the downloaded archive; local sources carry none.
    pub checksum: Option<String>,
    pub remote: bool,
}

/// Download (or copy) the source of `entry` into a fresh directory under
/// `scratch_parent`.
///
/// # Errors
///
/// [`Error::PathNotFound`] when a local source has disappeared, and
/// [`Error::ArchiveFormat`] when a download cannot be unpacked.
pub async fn fetch(client: &Client, scratch_parent: &Path, entry: &LockEntry) -> Result<Package> {
    let mut package = Package {
        category: entry.category,
        name: entry.name.clone(),
        root: PathBuf::new(),
        checksum: None,
        remote: false,
    };

    if let Some(url) = &entry.url {
        let extraction = extract_archive(client, url, scratch_parent, true).await?;
        package.checksum = Some(tagged(&extraction.checksum));
        package.root = extraction.persist();
        package.remote = true;
    } else if let Some(path) = &entry.path {
        let source = PathBuf::from(path);
        if !source.exists() {
            return Err(Error::PathNotFound(source));
        }
        let dest = tempfile::Builder::new()
            .prefix("local-")
            .tempdir_in(scratch_parent)?
            .keep();
        let target = match source.file_name() {
            Some(file_name) => dest.join(file_name),
            None => dest.clone(),
        };
        copy(&source, &target, None)?;
        package.root = dest;
    } else {
        return Err(Error::SchemaViolation(format!(
            "{}/{} has neither a url nor a path",
            entry.category, entry.name
        )));
    }
    debug!(name = %entry.name, root = %package.root.display(), "fetched package");
    Ok(package)
}

/// Whether `relative` lies under a directory belonging to the other build
/// variant or to debug symbols.
pub fn excluded_by_variant(relative: &Path, build: BuildVariant) -> bool {
    let excluded = build.excluded_component();
    relative.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        part.ends_with(".dSYM") || part.eq_ignore_ascii_case(excluded)
    })
}

/// Whether `relative` sits inside another kext bundle.
fn is_plugin(relative: &Path) -> bool {
    relative
        .parent()
        .is_some_and(|p| p.components().any(|c| c.as_os_str().to_string_lossy().ends_with(".kext")))
}

/// Components `root` offers for `category`, keyed by stem. Kexts nested in
/// another bundle's `PlugIns/` are offered too, so they can be promoted
/// when listed as bundled. The shallowest match wins, then path order.
pub fn candidates(root: &Path, category: Category, build: BuildVariant) -> BTreeMap<String, PathBuf> {
    let extension = category.extension().trim_start_matches('.');
    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(next) = walker.next() {
        let Ok(entry) = next else { continue };
        let path = entry.path();
        let relative = path.relative(root);
        if excluded_by_variant(&relative, build) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        let matches = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }
        let is_bundle = category == Category::Kexts;
        if is_bundle != entry.file_type().is_dir() {
            continue;
        }
        if is_bundle && is_plugin(&relative) {
            debug!(plugin = %relative.display(), "found plugin bundle");
        }
        let depth = relative.components().count();
        match found.entry(path.stem_str().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(path.to_path_buf());
            }
            Entry::Occupied(mut slot) if slot.get().relative(root).components().count() > depth => {
                slot.insert(path.to_path_buf());
            }
            Entry::Occupied(_) => {}
        }
    }
    found
}

/// A component selected for the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub category: Category,
    pub name: String,
    pub source: PathBuf,
    /// Destination relative to the output root.
    pub filepath: String,
    /// Plugins kept inside a kext bundle; every other
    /// `Contents/PlugIns/*.kext` is pruned once placed.
    pub plugins: Vec<String>,
}

/// Move every component into place under `output`, replacing what is
/// there. Returns the final paths.
///
/// Nested sources (plugins listed as bundled) move first, which promotes
/// them out of their parent bundle. Plugins left behind in a placed kext
/// that its component does not list are removed.
pub fn materialize(output: &Path, components: &[Component]) -> Result<Vec<PathBuf>> {
    let mut ordered: Vec<&Component> = components.iter().collect();
    ordered.sort_by_key(|c| std::cmp::Reverse(c.source.components().count()));

    let mut placed = Vec::with_capacity(components.len());
    for component in ordered {
        let dest = output.join(&component.filepath);
        let parent = dest.parent().unwrap_or(output);
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let final_path = move_path(&component.source, parent, file_name.as_deref())?;
        debug!(name = %component.name, dest = %final_path.display(), "placed component");
        placed.push(final_path);
    }

    for component in components.iter().filter(|c| c.category == Category::Kexts) {
        prune_plugins(&output.join(&component.filepath), &component.plugins)?;
    }
    Ok(placed)
}

/// Remove every `Contents/PlugIns/*.kext` of `bundle` whose stem is not in
/// `keep`. Returns the removed paths.
pub fn prune_plugins(bundle: &Path, keep: &[String]) -> Result<Vec<PathBuf>> {
    let plugins_dir = bundle.join("Contents").join("PlugIns");
    let Ok(entries) = std::fs::read_dir(&plugins_dir) else {
        return Ok(Vec::new());
    };
    let mut pruned = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_kext = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("kext"));
        if !is_kext || keep.iter().any(|k| k == path.stem_str()) {
            continue;
        }
        remove(&path)?;
        debug!(plugin = %path.display(), "pruned unlisted plugin");
        pruned.push(path);
    }
    pruned.sort();
    Ok(pruned)
}

/// Entries of `expected` with no file of the same stem in their category's
/// output directory, as [`Error::PathShapeInvalid`].
pub fn validate(output: &Path, expected: &[(Category, String)]) -> Vec<Error> {
    let mut missing = Vec::new();
    for (category, name) in expected {
        let dir = output.join(category.output_dir());
        let present = std::fs::read_dir(&dir).is_ok_and(|entries| {
            entries
                .flatten()
                .any(|e| e.path().stem_str() == name.as_str())
        });
        if !present {
            missing.push(Error::PathShapeInvalid {
                kind: category.kind(),
                name: name.clone(),
                path: category.default_filepath(name),
            });
        }
    }
    if missing.is_empty() {
        info!(entries = expected.len(), "output tree validated");
    }
    missing
}

/// Empty every component directory under `output` (creating it when
/// missing).
pub fn reset_component_dirs(output: &Path) -> Result<()> {
    for category in Category::COMPONENTS {
        let dir = output.join(category.output_dir());
        remove(&dir)?;
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_kext_candidates_respect_variant() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for kext in [
            "Release/Lilu.kext",
            "Debug/Lilu.kext",
            "Release/Lilu.kext.dSYM/Contents/Resources/Lilu.kext",
            "Release/VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Keyboard.kext",
        ] {
            touch(&root.join(kext).join("Contents/Info.plist"));
        }

        let release = candidates(root, Category::Kexts, BuildVariant::Release);
        assert_eq!(
            release.keys().collect::<Vec<_>>(),
            vec!["Lilu", "VoodooPS2Controller", "VoodooPS2Keyboard"]
        );
        assert_eq!(release["Lilu"], root.join("Release/Lilu.kext"));

        let debug = candidates(root, Category::Kexts, BuildVariant::Debug);
        assert_eq!(debug["Lilu"], root.join("Debug/Lilu.kext"));
    }

    #[test]
    fn test_efi_candidates_are_files() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("X64/EFI/OC/Drivers/OpenRuntime.efi"));
        fs::create_dir_all(dir.path().join("odd.efi")).unwrap();
        let found = candidates(dir.path(), Category::Drivers, BuildVariant::Release);
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["OpenRuntime"]);
    }

    #[test]
    fn test_materialize_and_validate() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        touch(&src.join("Lilu.kext/Contents/Info.plist"));
        touch(&src.join("VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Keyboard.kext/Contents/Info.plist"));
        reset_component_dirs(&out).unwrap();

        let components = vec![
            Component {
                category: Category::Kexts,
                name: "Lilu".into(),
                source: src.join("Lilu.kext"),
                filepath: Category::Kexts.default_filepath("Lilu"),
                plugins: Vec::new(),
            },
            Component {
                category: Category::Kexts,
                name: "VoodooPS2Keyboard".into(),
                source: src.join("VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Keyboard.kext"),
                filepath: Category::Kexts.default_filepath("VoodooPS2Keyboard"),
                plugins: Vec::new(),
            },
        ];
        materialize(&out, &components).unwrap();
        assert!(out.join("EFI/OC/Kexts/VoodooPS2Keyboard.kext/Contents/Info.plist").is_file());
        assert!(!src.join("VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Keyboard.kext").exists());

        let expected = vec![
            (Category::Kexts, "Lilu".to_string()),
            (Category::Kexts, "VoodooPS2Keyboard".to_string()),
            (Category::Drivers, "HfsPlus".to_string()),
        ];
        let missing = validate(&out, &expected);
        assert_eq!(missing.len(), 1);
        assert!(matches!(
            &missing[0],
            Error::PathShapeInvalid { name, path, .. } if name == "HfsPlus" && path == "EFI/OC/Drivers/HfsPlus.efi"
        ));
    }

    #[test]
    fn test_candidates_prefer_top_level_bundle() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("AppleALC.kext/Contents/PlugIns/Lilu.kext/Contents/Info.plist"));
        touch(&root.join("Lilu.kext/Contents/Info.plist"));

        let found = candidates(root, Category::Kexts, BuildVariant::Release);
        assert_eq!(found["Lilu"], root.join("Lilu.kext"));
    }

    #[test]
    fn test_materialize_prunes_unlisted_plugins() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        let bundle = src.join("VoodooPS2Controller.kext");
        touch(&bundle.join("Contents/Info.plist"));
        for plugin in ["VoodooPS2Keyboard", "VoodooPS2Mouse", "VoodooPS2Trackpad"] {
            touch(&bundle.join(format!("Contents/PlugIns/{plugin}.kext/Contents/Info.plist")));
        }
        reset_component_dirs(&out).unwrap();

        let components = vec![
            Component {
                category: Category::Kexts,
                name: "VoodooPS2Controller".into(),
                source: bundle.clone(),
                filepath: Category::Kexts.default_filepath("VoodooPS2Controller"),
                plugins: vec!["VoodooPS2Keyboard".into(), "VoodooPS2Trackpad".into()],
            },
            Component {
                category: Category::Kexts,
                name: "VoodooPS2Keyboard".into(),
                source: bundle.join("Contents/PlugIns/VoodooPS2Keyboard.kext"),
                filepath: Category::Kexts.default_filepath("VoodooPS2Keyboard"),
                plugins: Vec::new(),
            },
        ];
        materialize(&out, &components).unwrap();

        let kexts = out.join("EFI/OC/Kexts");
        let plugins = kexts.join("VoodooPS2Controller.kext/Contents/PlugIns");
        assert!(kexts.join("VoodooPS2Controller.kext/Contents/Info.plist").is_file());
        assert!(kexts.join("VoodooPS2Keyboard.kext/Contents/Info.plist").is_file());
        assert!(!plugins.join("VoodooPS2Keyboard.kext").exists());
        assert!(!plugins.join("VoodooPS2Mouse.kext").exists());
        assert!(plugins.join("VoodooPS2Trackpad.kext/Contents/Info.plist").is_file());
    }
}
