//! Content digests for files, directory trees and streams.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a file, or of a directory tree.
///
/// Directories are hashed by feeding each entry's name and then its content
/// (recursively for subdirectories) in sorted name order, so the digest is
/// independent of filesystem enumeration order.
pub fn digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    if fs::metadata(path)?.is_dir() {
        feed_dir(&mut hasher, path)?;
    } else {
        io::copy(&mut File::open(path)?, &mut hasher)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

fn feed_dir(hasher: &mut Sha256, dir: &Path) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        hasher.update(entry.file_name().to_string_lossy().as_bytes());
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            feed_dir(hasher, &path)?;
        } else {
            io::copy(&mut File::open(&path)?, hasher)?;
        }
    }
    Ok(())
}

/// Hex SHA-256 of everything remaining in `reader`. Callers wanting the
/// whole stream must rewind first.
pub fn stream_digest<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Digest tagged with its algorithm, as persisted in lockfiles.
pub fn tagged(hex_digest: &str) -> String {
    format!("{}:{hex_digest}", efibuild_schema::DIGEST_ALGORITHM)
}

/// Hex SHA-256 of a byte string.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
