//! Archive extraction module
//!
//! Handles zip, tar, tar.gz and tar.zst. Release archives of EFI components
//! are almost always zip files, sometimes wrapping further zips (CI
//! artifacts), so [`unpack_nested`] is provided for a second pass.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use crate::io::fs::remove;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Container formats recognized by suffix or magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarZst,
    /// Not an archive; copied as-is.
    Raw,
}

/// Detect archive format from a file name.
pub fn detect_format(name: &str) -> Option<ArchiveFormat> {
    let name = name.to_lowercase();
    if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        Some(ArchiveFormat::TarZst)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Detect archive format from the leading bytes of a file.
pub fn sniff_format(path: &Path) -> io::Result<ArchiveFormat> {
    let mut magic = [0u8; 4];
    let read = File::open(path)?.read(&mut magic)?;
    Ok(match &magic[..read] {
        [0x50, 0x4B, 0x03, 0x04] => ArchiveFormat::Zip,
        [0x1F, 0x8B, ..] => ArchiveFormat::TarGz,
        [0x28, 0xB5, 0x2F, 0xFD] => ArchiveFormat::TarZst,
        _ => ArchiveFormat::Raw,
    })
}

/// Extract `archive_path` into `dest_dir`, choosing the unpacker from
/// `name` (falling back to the file's magic bytes). Returns the extracted
/// file paths.
pub fn extract_file(
    archive_path: &Path,
    name: &str,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ExtractError> {
    let format = match detect_format(name) {
        Some(f) => f,
        None => sniff_format(archive_path)?,
    };
    fs::create_dir_all(dest_dir)?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
        ArchiveFormat::TarGz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArchiveFormat::TarZst => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(ZstdDecoder::new(reader)?, dest_dir)
        }
        ArchiveFormat::Tar => extract_tar(BufReader::new(File::open(archive_path)?), dest_dir),
        ArchiveFormat::Raw => {
            let file_name = Path::new(name)
                .file_name()
                .ok_or_else(|| ExtractError::UnsupportedFormat(name.to_string()))?;
            let dest_path = dest_dir.join(file_name);
            fs::copy(archive_path, &dest_path)?;
            Ok(vec![dest_path])
        }
    }
}

/// Extract a tar archive from a reader
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let relative_path: PathBuf = entry.path()?.components().collect();
        let absolute_path = dest_dir.join(&relative_path);

        // Sanitize path to prevent Zip Slip
        if !absolute_path.starts_with(dest_dir)
            || relative_path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                relative_path.display()
            )));
        }

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&absolute_path)?;
        extracted.push(absolute_path);
    }

    Ok(extracted)
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            continue;
        };

        let absolute_path = dest_dir.join(&relative_path);
        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
        }

        extracted.push(absolute_path);
    }

    Ok(extracted)
}

/// Unpack every `*.zip` under `root` into a sibling directory named after
/// the archive's stem, recursing into what comes out. The nested archives
/// are removed afterwards.
pub fn unpack_nested(root: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut unpacked = Vec::new();
    let mut pending: Vec<PathBuf> = find_zips(root);

    while let Some(archive) = pending.pop() {
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = archive.with_file_name(&stem);
        let name = archive.to_string_lossy().into_owned();
        tracing::debug!("Unpacking nested archive {}", archive.display());

        extract_file(&archive, &name, &dest)?;
        remove(&archive)?;
        pending.extend(find_zips(&dest));
        unpacked.push(dest);
    }

    Ok(unpacked)
}

fn find_zips(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        })
        .map(walkdir::DirEntry::into_path)
        .collect()
}
