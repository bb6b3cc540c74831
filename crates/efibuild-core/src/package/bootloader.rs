//! Bootloader package layout.

use std::fs;
use std::path::{Path, PathBuf};

use efibuild_schema::Target;
use tracing::{debug, info};

use crate::config::{CONFIG_PATH, SAMPLE_PATH};
use crate::error::{Error, Result};
use crate::io::fs::{copy, glob_first, move_path};

/// Companion archive with drivers and resources the bootloader does not
/// ship.
pub const COMPANION_REPO: &str = "acidanthera/OcBinaryData";
pub const COMPANION_BRANCH: &str = "master";

/// A bootloader package rearranged as `EFI/`, `Docs/`, `Utilities/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    pub fn efi(&self) -> PathBuf {
        self.root.join("EFI")
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_PATH)
    }

    pub fn sample(&self) -> PathBuf {
        self.root.join(SAMPLE_PATH)
    }
}

/// The directory holding the `EFI` tree for `target`. Archives nest it as
/// `<target>/EFI`; local trees may already be flat.
fn find_efi(package_root: &Path, target: Target) -> Result<PathBuf> {
    if let Some(efi) = glob_first(package_root, &format!("**/{target}/EFI"))? {
        return Ok(efi);
    }
    if let Some(oc) = glob_first(package_root, "**/EFI/OC")? {
        if let Some(efi) = oc.parent() {
            return Ok(efi.to_path_buf());
        }
    }
    Err(Error::PathNotFound(package_root.join(target.as_str()).join("EFI")))
}

/// Move the `target` tree of the package at `package_root` into `dest`
/// along with `Docs/` and `Utilities/`, then seed `EFI/OC/config.plist`
/// from the sample.
pub fn layout_bootloader(package_root: &Path, target: Target, dest: &Path) -> Result<Layout> {
    let efi = find_efi(package_root, target)?;
    // Docs and Utilities sit next to the per-target directories
    let base = efi
        .parent()
        .and_then(|p| if p.ends_with(target.as_str()) { p.parent() } else { Some(p) })
        .unwrap_or(package_root)
        .to_path_buf();

    fs::create_dir_all(dest)?;
    move_path(&efi, dest, Some("EFI"))?;
    for extra in ["Docs", "Utilities"] {
        let path = base.join(extra);
        if path.is_dir() {
            move_path(&path, dest, Some(extra))?;
        }
    }

    let layout = Layout {
        root: dest.to_path_buf(),
    };
    let sample = layout.sample();
    let config = layout.config();
    if sample.is_file() && !config.is_file() {
        copy(&sample, &config, None)?;
        debug!("seeded {} from the sample configuration", config.display());
    }
    Ok(layout)
}

/// Strip single-directory wrappers (`OcBinaryData-master/`).
fn unwrap_single_dir(root: &Path) -> Result<PathBuf> {
    let mut current = root.to_path_buf();
    loop {
        let children: Vec<_> = fs::read_dir(&current)?.flatten().collect();
        match children.as_slice() {
            [only] if only.file_type().is_ok_and(|t| t.is_dir()) => current = only.path(),
            _ => return Ok(current),
        }
    }
}

/// Merge every top-level directory of the companion package whose name
/// also exists under `EFI/OC`. Returns the merged directory names.
pub fn merge_companion(layout: &Layout, companion_root: &Path) -> Result<Vec<String>> {
    let base = unwrap_single_dir(companion_root)?;
    let oc = layout.efi().join("OC");
    let mut merged = Vec::new();

    let mut children: Vec<_> = fs::read_dir(&base)?.flatten().collect();
    children.sort_by_key(fs::DirEntry::file_name);
    for child in children {
        if !child.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = child.file_name().to_string_lossy().into_owned();
        let dest = oc.join(&name);
        if dest.is_dir() {
            copy(&child.path(), &dest, None)?;
            merged.push(name);
        }
    }
    info!(dirs = ?merged, "merged companion package");
    Ok(merged)
}
