use serde::{Deserialize, Deserializer, Serialize};

use crate::{Arch, Version};

/// Identifies one application on one mirror, parsed from
/// `apps/<backend>/<app>.json`.
///
/// Which optional fields are required depends on the mirror; backends
/// check that when the config is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Site slug for the app (`youtube`, `instagram-android`, ...).
    pub name: String,

    /// Organisation slug (`google-inc`), used by APKMirror.
    #[serde(default)]
    pub org: Option<String>,

    /// Android package id (`com.google.android.youtube`), used by APKPure.
    #[serde(default)]
    pub package: Option<String>,

    /// Release-name override for sites whose release pages are not named
    /// after the app slug.
    #[serde(default)]
    pub release_prefix: Option<String>,

    /// Preferred pixel-density class (`nodpi`, `120-640dpi`).
    #[serde(default)]
    pub dpi: Option<String>,

    /// Default architecture when the request does not name one.
    #[serde(default, deserialize_with = "lenient_arch")]
    pub arch: Option<Arch>,

    /// Pinned version; skips latest-version discovery when set.
    #[serde(default)]
    pub version: Option<Version>,
}

impl AppConfig {
    /// Config with only the site slug set.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Release-name prefix for release page URLs, defaulting to the slug.
    pub fn release_name(&self) -> &str {
        self.release_prefix.as_deref().unwrap_or(&self.name)
    }

    /// Parse a config from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the text is not a
    /// valid config object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn lenient_arch<'de, D>(deserializer: D) -> Result<Option<Arch>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| Arch::parse_or_universal(&s)))
}

fn lenient_arches<'de, D>(deserializer: D) -> Result<Vec<Arch>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    Ok(raw.iter().map(|s| Arch::parse_or_universal(s)).collect())
}

/// A resolved, directly fetchable package URL plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCandidate {
    /// Absolute URL of the package file.
    pub url: String,
    /// Version the URL was resolved for.
    pub version: Version,
    /// Architecture the URL was resolved for.
    pub arch: Arch,
    /// Identifier of the backend that produced the URL.
    pub backend: String,
}

/// Errors that can occur when building a [`DownloadCandidate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    /// The URL is empty.
    #[error("Empty download URL")]
    Empty,

    /// The URL is relative or uses a scheme other than http(s).
    #[error("Download URL is not absolute http(s): {0}")]
    NotAbsolute(String),
}

impl DownloadCandidate {
    /// Build a candidate, rejecting URLs that cannot be fetched directly.
    ///
    /// # Errors
    ///
    /// Returns [`CandidateError::Empty`] for an empty URL and
    /// [`CandidateError::NotAbsolute`] for anything that does not start
    /// with `http://` or `https://`.
    pub fn new(
        url: impl Into<String>,
        version: Version,
        arch: Arch,
        backend: impl Into<String>,
    ) -> Result<Self, CandidateError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(CandidateError::Empty);
        }
        let lower = url.to_ascii_lowercase();
        if !(lower.starts_with("https://") || lower.starts_with("http://")) {
            return Err(CandidateError::NotAbsolute(url));
        }
        Ok(Self {
            url,
            version,
            arch,
            backend: backend.into(),
        })
    }
}

/// One row of `arch-config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchEntry {
    /// Application name the row applies to.
    pub app_name: String,
    /// Patch-source label the row applies to.
    pub source: String,
    /// Architectures to build, in order. Unknown selectors read as
    /// universal.
    #[serde(deserialize_with = "lenient_arches")]
    pub arches: Vec<Arch>,
}

/// The per-app build matrix from `arch-config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchMatrix(Vec<ArchEntry>);

impl ArchMatrix {
    /// Parse the matrix from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the text is not an
    /// array of entries.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Architectures configured for `app` built from `source`, or
    /// `[universal]` when there is no matching row.
    pub fn arches_for(&self, app: &str, source: &str) -> Vec<Arch> {
        self.lookup(app, Some(source))
            .map_or_else(|| vec![Arch::Universal], <[Arch]>::to_vec)
    }

    /// Configured architectures for `app`, if a non-empty row exists. With
    /// no `source`, the first row for the app matches.
    pub fn lookup(&self, app: &str, source: Option<&str>) -> Option<&[Arch]> {
        self.0
            .iter()
            .find(|e| e.app_name == app && source.is_none_or(|s| e.source == s))
            .map(|e| e.arches.as_slice())
            .filter(|arches| !arches.is_empty())
    }
}
