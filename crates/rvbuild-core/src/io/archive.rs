//! Recognise what a downloaded file actually is.
//!
//! Mirrors sometimes hand out split bundles instead of a plain APK, and a
//! blocked request may save an HTML page under an `.apk` name. Both are
//! zip containers or not at all, so the central directory tells them apart.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

const MANIFEST: &str = "AndroidManifest.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    /// Installable APK.
    Apk,
    /// Split bundle (`.apkm`, `.xapk`, `.apks`); must be merged before patching.
    Bundle,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apk => "apk",
            Self::Bundle => "bundle",
        }
    }

    pub fn needs_merge(&self) -> bool {
        matches!(self, Self::Bundle)
    }
}

impl std::fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} is not an Android package: {reason}", path.display())]
    NotAPackage { path: PathBuf, reason: String },
}

/// Classify the file at `path`.
///
/// # Errors
///
/// [`ArchiveError::NotAPackage`] when the file is not a zip container or
/// holds neither a root manifest nor nested APKs.
pub fn inspect(path: &Path) -> Result<PackageFormat, ArchiveError> {
    let not_a_package = |reason: String| ArchiveError::NotAPackage {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path)?;
    let archive = match ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(ZipError::Io(e)) => return Err(e.into()),
        Err(e) => return Err(not_a_package(e.to_string())),
    };

    let mut nested = 0usize;
    for name in archive.file_names() {
        if name == MANIFEST {
            return Ok(PackageFormat::Apk);
        }
        if name.to_ascii_lowercase().ends_with(".apk") {
            nested += 1;
        }
    }

    if nested > 0 {
        Ok(PackageFormat::Bundle)
    } else {
        Err(not_a_package(format!(
            "no {MANIFEST} and no nested APKs in {} entries",
            archive.len()
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// Zip bytes holding `entries` with placeholder content.
    pub(crate) fn zip_bytes(entries: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(b"placeholder").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn plain_apk_has_root_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "app.apk",
            &zip_bytes(&["AndroidManifest.xml", "classes.dex", "res/layout/main.xml"]),
        );
        assert_eq!(inspect(&path).unwrap(), PackageFormat::Apk);
    }

    #[test]
    fn split_bundle_has_nested_apks() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "app.apkm",
            &zip_bytes(&["info.json", "base.apk", "split_config.arm64_v8a.apk"]),
        );
        let format = inspect(&path).unwrap();
        assert_eq!(format, PackageFormat::Bundle);
        assert!(format.needs_merge());
    }

    #[test]
    fn html_page_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "app.apk",
            b"<html><head><title>Just a moment...</title></head></html>",
        );
        assert!(matches!(inspect(&path), Err(ArchiveError::NotAPackage { .. })));
    }

    #[test]
    fn zip_without_manifest_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.apk", &zip_bytes(&["readme.txt"]));
        let err = inspect(&path).unwrap_err();
        assert!(err.to_string().contains("no AndroidManifest.xml"), "{err}");
    }
}
