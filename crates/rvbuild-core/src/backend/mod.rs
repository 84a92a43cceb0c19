//! Mirror backends.
//!
//! A backend knows one distribution site's URL scheme and page layout. It
//! turns an [`AppConfig`] into the latest stable version and, for a given
//! version and architecture, into a [`DownloadCandidate`]. Each backend
//! owns its own [`FetchClient`] session.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rvbuild_schema::version::is_prerelease_label;
use rvbuild_schema::{AppConfig, Arch, CandidateError, DownloadCandidate, Version};
use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::http::{FetchClient, FetchError, FetchOptions, Page, Throttle};
use crate::parse::{Extractor, VersionMatch, absolutize, match_version};
use crate::solver::ChallengeSolver;

static DASHED_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:-\d+)+$").expect("valid slug pattern"));
static BARE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)+(?:[-+_][0-9A-Za-z.]+)*$").expect("valid label pattern"));

pub mod apkmirror;
pub mod apkpure;
pub mod uptodown;

pub use apkmirror::ApkMirror;
pub use apkpure::ApkPure;
pub use uptodown::Uptodown;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{what} not found on {url}")]
    ParseMiss { what: &'static str, url: String },

    #[error("No stable version listed on {url}")]
    NoStableVersion { url: String },

    #[error("{url} is not the page for version {version}")]
    VersionMismatch { url: String, version: Version },

    #[error(transparent)]
    Candidate(#[from] CandidateError),
}

/// One distribution site.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier, also the config directory name (`apkmirror`).
    fn id(&self) -> &str;

    /// Check that `config` carries the fields this site needs.
    fn validate(&self, _config: &AppConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Latest stable version the site lists for the app.
    async fn latest_version(&self, config: &AppConfig) -> Result<Version, BackendError>;

    /// Directly fetchable package URL for `version` and `arch`.
    async fn resolve(
        &self,
        config: &AppConfig,
        version: &Version,
        arch: Arch,
    ) -> Result<DownloadCandidate, BackendError>;

    /// The session the resolved URLs are valid for.
    fn client(&self) -> &FetchClient;
}

/// Session settings shared by every backend built from the command line.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub proxy: Option<String>,
    pub throttle: Throttle,
    pub cookies: Vec<String>,
    pub user_agent: Option<String>,
    /// Shared by every backend; each solve opens its own browser session.
    pub solver: Option<Arc<dyn ChallengeSolver>>,
}

impl BackendSettings {
    fn options(&self, base_url: &str) -> FetchOptions {
        FetchOptions::new(base_url)
            .with_proxy(self.proxy.clone())
            .with_throttle(self.throttle)
            .with_cookies(self.cookies.clone())
            .with_user_agent(self.user_agent.clone())
            .with_solver(self.solver.clone())
    }
}

/// The built-in sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    ApkMirror,
    ApkPure,
    Uptodown,
}

impl BackendKind {
    /// Order in which the sites are tried.
    pub const PRIORITY: [Self; 3] = [Self::ApkMirror, Self::ApkPure, Self::Uptodown];

    pub fn id(&self) -> &'static str {
        match self {
            Self::ApkMirror => ApkMirror::ID,
            Self::ApkPure => ApkPure::ID,
            Self::Uptodown => Uptodown::ID,
        }
    }

    /// Build the backend with a fresh session.
    ///
    /// # Errors
    ///
    /// Fails when the session cannot be created (bad proxy URL, TLS init).
    pub fn build(&self, settings: &BackendSettings) -> Result<Box<dyn Backend>, FetchError> {
        Ok(match self {
            Self::ApkMirror => Box::new(ApkMirror::new(
                ApkMirror::BASE_URL,
                FetchClient::new(&settings.options(ApkMirror::BASE_URL))?,
            )),
            Self::ApkPure => Box::new(ApkPure::new(
                ApkPure::BASE_URL,
                FetchClient::new(&settings.options(ApkPure::BASE_URL))?,
            )),
            Self::Uptodown => Box::new(Uptodown::new(
                None,
                FetchClient::new(&settings.options(Uptodown::REFERER))?,
            )),
        })
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|k| k.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown backend: {s}"))
    }
}

/// Fail unless `page` is about `version`; a partial match is accepted with
/// a warning.
pub(crate) fn confirm_version(page: &Page, version: &Version) -> Result<(), BackendError> {
    match match_version(&page.body, version) {
        VersionMatch::Exact => Ok(()),
        VersionMatch::Partial => {
            warn!(url = %page.final_url, %version, "no exact version match, accepting partial match as fallback");
            Ok(())
        }
        VersionMatch::Missing => Err(BackendError::VersionMismatch {
            url: page.final_url.clone(),
            version: version.clone(),
        }),
    }
}

/// Run `extractor` over `page` and resolve the hit against the page URL.
pub(crate) fn extract_link(page: &Page, extractor: &Extractor) -> Result<String, BackendError> {
    extractor
        .first(&page.body)
        .and_then(|hit| absolutize(&page.final_url, &hit.value))
        .ok_or_else(|| BackendError::ParseMiss {
            what: extractor.what(),
            url: page.final_url.clone(),
        })
}

/// Latest stable version among extracted labels or URL slugs.
///
/// Labels marked alpha/beta are dropped before the version is pulled out,
/// so `19.17.0 beta` never counts as `19.17.0`.
pub(crate) fn stable_from_hits(hits: &[String]) -> Option<Version> {
    rvbuild_schema::version::latest_stable(
        hits.iter()
            .filter(|hit| !is_prerelease_label(hit))
            .filter_map(|hit| version_from_hit(hit)),
    )
}

/// A bare dashed capture (`19-16-39` out of a release slug) is read as a
/// dotted version. A bare label is kept verbatim, dashes included, so it
/// still matches the listing it came from. Anything else has the first
/// dotted run pulled out of it.
fn version_from_hit(hit: &str) -> Option<Version> {
    let hit = hit.trim();
    if DASHED_SLUG.is_match(hit) {
        Some(Version::from_dashed(hit))
    } else if BARE_LABEL.is_match(hit) {
        Some(Version::new(hit))
    } else {
        Version::extract(hit)
    }
}

/// Latest stable version on `page`, trying each rule until one yields a
/// stable version.
pub(crate) fn latest_from_page(page: &Page, extractor: &Extractor) -> Result<Version, BackendError> {
    extractor
        .pick(&page.body, |hits| stable_from_hits(&hits))
        .map(|(_, version)| version)
        .ok_or_else(|| BackendError::NoStableVersion {
            url: page.final_url.clone(),
        })
}
