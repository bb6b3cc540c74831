//! Process-scoped scratch directory.
//!
//! The cache lives under the platform temp root as `efibuild-cache-<random>`.
//! Leftovers from runs that died before cleanup are collapsed on startup:
//! the most recent one is reused, the others are removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::io::fs::remove;

pub const CACHE_PREFIX: &str = "efibuild-cache-";

#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open (or create) the cache under `parent`, or the temp dir if `None`.
    pub fn open(parent: Option<&Path>) -> io::Result<Self> {
        let parent = parent.map_or_else(std::env::temp_dir, Path::to_path_buf);
        fs::create_dir_all(&parent)?;

        let mut leftovers: Vec<(SystemTime, PathBuf)> = fs::read_dir(&parent)?
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(CACHE_PREFIX))
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| {
                let modified = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, e.path())
            })
            .collect();
        leftovers.sort();

        if let Some((_, newest)) = leftovers.pop() {
            for (_, stale) in leftovers {
                tracing::debug!("Removing stale cache {}", stale.display());
                remove(&stale)?;
            }
            tracing::debug!("Reusing cache {}", newest.display());
            return Ok(Self { root: newest });
        }

        let root = tempfile::Builder::new()
            .prefix(CACHE_PREFIX)
            .tempdir_in(&parent)?
            .keep();
        tracing::debug!("Created cache {}", root.display());
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, uniquely named subdirectory.
    pub fn scratch(&self, prefix: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.root)?
            .keep())
    }

    /// Delete the cache directory and everything in it.
    pub fn clear(&self) -> io::Result<()> {
        remove(&self.root)
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            tracing::warn!("Failed to clear cache {}: {e}", self.root.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_clear_on_drop() {
        let parent = tempdir().unwrap();
        let cache = Cache::open(Some(parent.path())).unwrap();
        let root = cache.path().to_path_buf();
        assert!(root.starts_with(parent.path()));
        assert!(
            root.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(CACHE_PREFIX)
        );

        let a = cache.scratch("pkg-").unwrap();
        let b = cache.scratch("pkg-").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(&root));

        drop(cache);
        assert!(!root.exists());
    }

    #[test]
    fn test_collapses_leftovers() {
        let parent = tempdir().unwrap();
        let old = parent.path().join(format!("{CACHE_PREFIX}old"));
        let new = parent.path().join(format!("{CACHE_PREFIX}new"));
        fs::create_dir_all(&old).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::create_dir_all(&new).unwrap();

        let cache = Cache::open(Some(parent.path())).unwrap();
        assert_eq!(cache.path(), new);
        assert!(!old.exists());
    }
}
