//! Filesystem primitives: move, filtered copy, remove, and glob.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Callback deciding which children of a directory to skip while copying.
///
/// Receives the directory being copied and its child names; returns the
/// names to leave out.
pub type CopyFilter<'a> = &'a dyn Fn(&Path, &[OsString]) -> Vec<OsString>;

/// Move `src` into `dst_dir` (as `name`, or its own file name), replacing
/// anything already there. Creates missing parents and returns the final
/// path.
pub fn move_path(src: &Path, dst_dir: &Path, name: Option<&str>) -> io::Result<PathBuf> {
    let file_name = match name {
        Some(n) => OsString::from(n),
        None => src
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| io::Error::other(format!("{} has no file name", src.display())))?,
    };
    let dest = dst_dir.join(file_name);
    fs::create_dir_all(dst_dir)?;
    remove(&dest)?;

    if fs::rename(src, &dest).is_err() {
        // Cross-device: fall back to copy + delete
        copy(src, &dest, None)?;
        remove(src)?;
    }
    Ok(dest)
}

/// Copy a file or tree from `src` to `dst`, consulting `filter` at every
/// directory.
pub fn copy(src: &Path, dst: &Path, filter: Option<CopyFilter<'_>>) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    if meta.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    let Some(filter) = filter else {
        fs::create_dir_all(dst)?;
        return fs_extra::dir::copy(
            src,
            dst,
            &fs_extra::dir::CopyOptions::new()
                .content_only(true)
                .overwrite(true),
        )
        .map(|_| ())
        .map_err(|e| io::Error::other(format!("Copy failed: {e}")));
    };

    fs::create_dir_all(dst)?;
    let mut children: Vec<OsString> = fs::read_dir(src)?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<io::Result<_>>()?;
    children.sort();
    let skipped = filter(src, &children);

    for child in children.iter().filter(|c| !skipped.contains(c)) {
        copy(&src.join(child), &dst.join(child), Some(filter))?;
    }
    Ok(())
}

/// Remove a file or directory tree. Missing paths are not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Options for [`glob`].
#[derive(Debug, Default, Clone)]
pub struct GlobOptions<'a> {
    /// Additional patterns whose matches are added to the result.
    pub include: &'a [&'a str],
    /// Patterns (relative to the root) whose matches are removed.
    pub exclude: &'a [&'a str],
}

/// Paths under `root` matching `pattern`, sorted.
pub fn glob(root: &Path, pattern: &str, opts: &GlobOptions<'_>) -> io::Result<Vec<PathBuf>> {
    let excludes = opts
        .exclude
        .iter()
        .map(|p| glob::Pattern::new(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut matches = Vec::new();
    for pat in std::iter::once(&pattern).chain(opts.include.iter()) {
        let full = root.join(pat);
        let entries = glob::glob(&full.to_string_lossy())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        for entry in entries.flatten() {
            let rel = entry.relative(root);
            if excludes.iter().any(|ex| ex.matches_path(&rel)) {
                continue;
            }
            if !matches.contains(&entry) {
                matches.push(entry);
            }
        }
    }
    matches.sort();
    Ok(matches)
}

/// First path under `root` matching `pattern`, if any.
pub fn glob_first(root: &Path, pattern: &str) -> io::Result<Option<PathBuf>> {
    Ok(glob(root, pattern, &GlobOptions::default())?.into_iter().next())
}

/// Helpers layered over [`Path`].
pub trait PathExt {
    /// `self` relative to `base`, or `self` unchanged when it is not
    /// underneath.
    fn relative(&self, base: &Path) -> PathBuf;

    /// Forward-slash rendering, independent of host separator.
    fn posix(&self) -> String;

    /// File stem as UTF-8, empty when absent.
    fn stem_str(&self) -> &str;
}

impl PathExt for Path {
    fn relative(&self, base: &Path) -> PathBuf {
        self.strip_prefix(base)
            .map_or_else(|_| self.to_path_buf(), Path::to_path_buf)
    }

    fn posix(&self) -> String {
        self.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                Component::RootDir => Some(String::new()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn stem_str(&self) -> &str {
        self.file_stem().and_then(|s| s.to_str()).unwrap_or_default()
    }
}
