//! Archive download: stream a URL to a temporary file, hash it, unpack it.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::io::extract::{extract_file, unpack_nested};
use crate::io::fs::remove;

/// An unpacked archive on disk.
///
/// The directory is removed when the value is dropped unless
/// [`Extraction::persist`] was called.
#[derive(Debug)]
pub struct Extraction {
    root: PathBuf,
    /// Hex SHA-256 of the downloaded bytes.
    pub checksum: String,
    /// File name the server reported (or the URL's last segment).
    pub file_name: String,
    persist: bool,
}

impl Extraction {
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Keep the directory past this value's lifetime and return it.
    pub fn persist(mut self) -> PathBuf {
        self.persist = true;
        self.root.clone()
    }
}

impl Drop for Extraction {
    fn drop(&mut self) {
        if !self.persist {
            if let Err(e) = remove(&self.root) {
                tracing::debug!("Failed to release {}: {e}", self.root.display());
            }
        }
    }
}

/// File name from a `Content-Disposition` header, if present.
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    value.split(';').find_map(|part| {
        let part = part.trim();
        let name = part
            .strip_prefix("filename*=UTF-8''")
            .or_else(|| part.strip_prefix("filename="))?;
        Some(name.trim_matches('"').to_string())
    })
}

fn url_filename(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Fetch `url` into a scratch file inside `scratch_parent`, unpack it into a
/// fresh directory there, and optionally unpack nested zips.
pub async fn extract_archive(
    client: &Client,
    url: &str,
    scratch_parent: &Path,
    nested: bool,
) -> Result<Extraction> {
    tracing::debug!("Fetching {url}");
    let response = client.get(url).send().await?.error_for_status()?;
    let file_name = disposition_filename(response.headers()).unwrap_or_else(|| url_filename(url));

    let suffix = Path::new(&file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let download = tempfile::Builder::new()
        .prefix("download-")
        .suffix(&suffix)
        .tempfile_in(scratch_parent)?;

    let mut file = tokio::fs::File::create(download.path()).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
    }
    file.flush().await?;
    drop(file);
    let checksum = hex::encode(hasher.finalize());

    let root = tempfile::Builder::new()
        .prefix("extract-")
        .tempdir_in(scratch_parent)?
        .keep();
    let extraction = Extraction {
        root,
        checksum,
        file_name: file_name.clone(),
        persist: false,
    };

    let archive_path = download.path().to_path_buf();
    let dest = extraction.root.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        extract_file(&archive_path, &file_name, &dest)?;
        if nested {
            unpack_nested(&dest)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;

    Ok(extraction)
}
