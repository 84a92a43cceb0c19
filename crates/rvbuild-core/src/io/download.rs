//! Stream a resolved package to disk with SHA256 hashing.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Url;
use reqwest::header::CONTENT_DISPOSITION;
use rvbuild_schema::{Arch, DownloadCandidate, Version};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::http::{FetchClient, FetchError};
use crate::io::archive::{self, ArchiveError, PackageFormat};

const PACKAGE_EXTENSIONS: &[&str] = &["apk", "apkm", "xapk", "apks"];

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("No session for backend {0}")]
    UnknownBackend(String),
}

/// A package saved to disk.
#[derive(Debug, Clone, Serialize)]
pub struct Downloaded {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
    pub format: PackageFormat,
}

/// File stem for a downloaded package: `{app}-{arch}[-{source}]-v{version}`.
pub fn output_stem(app: &str, arch: Arch, source: Option<&str>, version: &Version) -> String {
    match source.filter(|s| !s.is_empty()) {
        Some(source) => format!("{app}-{arch}-{source}-v{version}"),
        None => format!("{app}-{arch}-v{version}"),
    }
}

/// Download `candidate` through `client` into `dest_dir/<stem>.<ext>`.
///
/// The body goes to `<stem>.part` first and is only renamed once it is
/// recognised as a package. On any failure the partial file is removed.
///
/// # Errors
///
/// Fetch and IO failures, or [`ArchiveError::NotAPackage`] when the body
/// is not an APK or bundle.
pub async fn download_candidate(
    client: &FetchClient,
    candidate: &DownloadCandidate,
    dest_dir: &Path,
    stem: &str,
) -> Result<Downloaded, DownloadError> {
    let response = client.download(&candidate.url).await?;
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ext = package_extension(disposition.as_deref(), response.url());

    tokio::fs::create_dir_all(dest_dir).await?;
    let part = dest_dir.join(format!("{stem}.part"));

    let (sha256, bytes) = match write_part(response, &part).await {
        Ok(written) => written,
        Err(e) => {
            tokio::fs::remove_file(&part).await.ok();
            return Err(e);
        }
    };

    let inspect_path = part.clone();
    let format = match tokio::task::spawn_blocking(move || archive::inspect(&inspect_path))
        .await
        .map_err(std::io::Error::other)?
    {
        Ok(format) => format,
        Err(e) => {
            tokio::fs::remove_file(&part).await.ok();
            return Err(e.into());
        }
    };

    let path = dest_dir.join(format!("{stem}.{ext}"));
    tokio::fs::rename(&part, &path).await?;
    info!(path = %path.display(), bytes, %format, %sha256, "downloaded");

    Ok(Downloaded {
        path,
        sha256,
        bytes,
        format,
    })
}

async fn write_part(response: reqwest::Response, part: &Path) -> Result<(String, u64), DownloadError> {
    let mut file = File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut bytes: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        bytes += chunk.len() as u64;
    }

    file.flush().await?;
    debug!(part = %part.display(), bytes, "body written");
    Ok((hex::encode(hasher.finalize()), bytes))
}

fn known_extension(name: &str) -> Option<&'static str> {
    let name = name
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .to_ascii_lowercase();
    let (_, ext) = name.rsplit_once('.')?;
    PACKAGE_EXTENSIONS.iter().find(|known| **known == ext).copied()
}

/// Extension from a `Content-Disposition` filename, else from the last URL
/// path segment, else `apk`.
fn package_extension(disposition: Option<&str>, url: &Url) -> &'static str {
    disposition
        .and_then(|d| {
            d.split(';')
                .filter_map(|param| param.trim().split_once('='))
                .filter(|(key, _)| key.trim().to_ascii_lowercase().starts_with("filename"))
                .find_map(|(_, value)| known_extension(value))
        })
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(known_extension)
        })
        .unwrap_or("apk")
}
