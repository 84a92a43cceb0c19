//! Try each mirror in priority order until one produces a download URL.
//!
//! Backends fail all the time (missing config, layout drift, anti-bot
//! pages), so every failure here is recorded and the next backend is
//! tried. Only exhaustion is an error, and it carries the full record.

use std::fmt;
use std::path::{Path, PathBuf};

use rvbuild_schema::{Arch, DownloadCandidate, Version};
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};

use crate::backend::{Backend, BackendError, BackendKind, BackendSettings};
use crate::config::{ConfigError, ConfigStore};
use crate::http::FetchError;
use crate::io::download::{DownloadError, Downloaded, download_candidate};

/// What to acquire. Unset fields fall back to the per-backend config, then
/// to the latest stable version and the universal architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub app: String,
    pub arch: Option<Arch>,
    pub version: Option<Version>,
}

impl AcquireRequest {
    pub fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
            arch: None,
            version: None,
        }
    }

    #[must_use]
    pub fn with_arch(mut self, arch: Option<Arch>) -> Self {
        self.arch = arch;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Option<Version>) -> Self {
        self.version = version;
        self
    }
}

/// Why one backend produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    ConfigMissing { path: PathBuf },
    ConfigInvalid { reason: String },
    ResolutionFailed { reason: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMissing { path } => write!(f, "no config (expected {})", path.display()),
            Self::ConfigInvalid { reason } => write!(f, "invalid config: {reason}"),
            Self::ResolutionFailed { reason } => write!(f, "resolution failed: {reason}"),
        }
    }
}

impl From<BackendError> for AttemptFailure {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Config(e) => Self::ConfigInvalid {
                reason: e.to_string(),
            },
            other => Self::ResolutionFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub backend: String,
    pub failure: AttemptFailure,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.failure)
    }
}

/// A resolved candidate plus the backends that failed before it.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub candidate: DownloadCandidate,
    pub failed: Vec<Attempt>,
}

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("No backends enabled")]
    NoBackends,

    #[error("{}", exhausted_report(.app, .apps_dir, .attempts))]
    Exhausted {
        app: String,
        apps_dir: PathBuf,
        attempts: Vec<Attempt>,
    },
}

impl AcquireError {
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Exhausted { attempts, .. } => attempts,
            Self::NoBackends => &[],
        }
    }

    /// True when no backend had a config for the app at all.
    pub fn is_unconfigured(&self) -> bool {
        let attempts = self.attempts();
        !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| matches!(a.failure, AttemptFailure::ConfigMissing { .. }))
    }
}

fn exhausted_report(app: &str, apps_dir: &Path, attempts: &[Attempt]) -> String {
    let mut report = format!("Could not acquire {app} from any backend:");
    for attempt in attempts {
        report.push_str("\n  ");
        report.push_str(&attempt.to_string());
    }
    report.push_str(&format!(
        "\nhint: create {}/<backend>/{app}.json for at least one backend",
        apps_dir.display()
    ));
    report
}

/// Runs backends in order against one config store.
pub struct Acquirer {
    backends: Vec<Box<dyn Backend>>,
    configs: ConfigStore,
}

impl Acquirer {
    pub fn new(backends: Vec<Box<dyn Backend>>, configs: ConfigStore) -> Self {
        Self { backends, configs }
    }

    /// Build the given built-in backends, each with its own session.
    ///
    /// # Errors
    ///
    /// Fails when a session cannot be created.
    pub fn from_kinds(
        kinds: &[BackendKind],
        settings: &BackendSettings,
        configs: ConfigStore,
    ) -> Result<Self, FetchError> {
        let backends = kinds
            .iter()
            .map(|kind| kind.build(settings))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(backends, configs))
    }

    /// Resolve a download URL from the first backend that can provide one.
    ///
    /// # Errors
    ///
    /// [`AcquireError::Exhausted`] when every backend failed, with one
    /// [`Attempt`] per backend. Backend errors never escape otherwise.
    pub async fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition, AcquireError> {
        if self.backends.is_empty() {
            return Err(AcquireError::NoBackends);
        }

        let mut failed = Vec::new();
        for backend in &self.backends {
            let span = info_span!("backend", id = backend.id(), app = %request.app);
            match self.attempt(backend.as_ref(), request).instrument(span).await {
                Ok(candidate) => {
                    info!(backend = backend.id(), url = %candidate.url, version = %candidate.version, "acquired");
                    return Ok(Acquisition { candidate, failed });
                }
                Err(failure) => {
                    warn!(backend = backend.id(), %failure, "backend failed, trying next");
                    failed.push(Attempt {
                        backend: backend.id().to_string(),
                        failure,
                    });
                }
            }
        }

        Err(AcquireError::Exhausted {
            app: request.app.clone(),
            apps_dir: self.configs.root().to_path_buf(),
            attempts: failed,
        })
    }

    async fn attempt(
        &self,
        backend: &dyn Backend,
        request: &AcquireRequest,
    ) -> Result<DownloadCandidate, AttemptFailure> {
        let config = self.load_config(backend, &request.app)?;

        let version = match request.version.clone().or_else(|| config.version.clone()) {
            Some(version) => version,
            None => backend.latest_version(&config).await?,
        };
        let arch = request.arch.or(config.arch).unwrap_or_default();
        info!(%version, %arch, "resolving");

        Ok(backend.resolve(&config, &version, arch).await?)
    }

    fn load_config(
        &self,
        backend: &dyn Backend,
        app: &str,
    ) -> Result<rvbuild_schema::AppConfig, AttemptFailure> {
        let config = self
            .configs
            .load(backend.id(), app)
            .map_err(|e| match e {
                ConfigError::Missing { path } => AttemptFailure::ConfigMissing { path },
                other => AttemptFailure::ConfigInvalid {
                    reason: other.to_string(),
                },
            })?;
        backend
            .validate(&config)
            .map_err(|e| AttemptFailure::ConfigInvalid {
                reason: e.to_string(),
            })?;
        Ok(config)
    }

    /// Latest stable version per backend, for reporting.
    pub async fn latest_versions(&self, app: &str) -> Vec<(String, Result<Version, AttemptFailure>)> {
        let mut out = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let span = info_span!("backend", id = backend.id(), %app);
            let result = async {
                let config = self.load_config(backend.as_ref(), app)?;
                Ok::<_, AttemptFailure>(backend.latest_version(&config).await?)
            }
            .instrument(span)
            .await;
            out.push((backend.id().to_string(), result));
        }
        out
    }

    /// Download an acquired candidate through the session that resolved it.
    ///
    /// # Errors
    ///
    /// See [`download_candidate`]; also [`DownloadError::UnknownBackend`] if
    /// the candidate did not come from this acquirer.
    pub async fn download(
        &self,
        acquisition: &Acquisition,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<Downloaded, DownloadError> {
        let candidate = &acquisition.candidate;
        let backend = self
            .backends
            .iter()
            .find(|b| b.id() == candidate.backend)
            .ok_or_else(|| DownloadError::UnknownBackend(candidate.backend.clone()))?;
        download_candidate(backend.client(), candidate, dest_dir, stem).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ApkPure;
    use crate::http::{FetchClient, FetchOptions, Throttle};
    use async_trait::async_trait;
    use rvbuild_schema::AppConfig;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    type Calls = Arc<Mutex<Vec<String>>>;

    struct FakeBackend {
        id: &'static str,
        url: Option<&'static str>,
        latest: &'static str,
        calls: Calls,
        client: FetchClient,
    }

    impl FakeBackend {
        fn boxed(
            id: &'static str,
            url: Option<&'static str>,
            latest: &'static str,
            calls: &Calls,
        ) -> Box<dyn Backend> {
            Box::new(Self {
                id,
                url,
                latest,
                calls: Arc::clone(calls),
                client: FetchClient::new(&FetchOptions::new("https://site.example")).unwrap(),
            })
        }

        fn record(&self, what: &str) {
            self.calls.lock().unwrap().push(format!("{}.{what}", self.id));
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn id(&self) -> &str {
            self.id
        }

        fn validate(&self, config: &AppConfig) -> Result<(), ConfigError> {
            if config.name == "broken" {
                return Err(ConfigError::MissingField {
                    backend: self.id.to_string(),
                    field: "org",
                });
            }
            Ok(())
        }

        async fn latest_version(&self, _config: &AppConfig) -> Result<Version, BackendError> {
            self.record("latest");
            Ok(Version::new(self.latest))
        }

        async fn resolve(
            &self,
            _config: &AppConfig,
            version: &Version,
            arch: Arch,
        ) -> Result<DownloadCandidate, BackendError> {
            self.record("resolve");
            match self.url {
                Some(url) => Ok(DownloadCandidate::new(url, version.clone(), arch, self.id)?),
                None => Err(BackendError::ParseMiss {
                    what: "download link",
                    url: format!("https://{}.example/page", self.id),
                }),
            }
        }

        fn client(&self) -> &FetchClient {
            &self.client
        }
    }

    fn store(apps: &[(&str, AppConfig)]) -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = apps
            .iter()
            .fold(ConfigStore::new(dir.path()), |store, (backend, cfg)| {
                store.with_config(backend, "yt", cfg.clone())
            });
        (dir, store)
    }

    #[tokio::test]
    async fn falls_through_to_next_backend() {
        let calls = Calls::default();
        let (_dir, configs) = store(&[
            ("site1", AppConfig::named("youtube")),
            ("site2", AppConfig::named("youtube")),
        ]);
        let acquirer = Acquirer::new(
            vec![
                FakeBackend::boxed("site1", None, "2.0.0", &calls),
                FakeBackend::boxed("site2", Some("https://site2.example/app.apk"), "2.1.0", &calls),
            ],
            configs,
        );

        let got = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap();
        assert_eq!(got.candidate.url, "https://site2.example/app.apk");
        assert_eq!(got.candidate.version, "2.1.0");
        assert_eq!(got.candidate.backend, "site2");
        assert_eq!(got.failed.len(), 1);
        assert_eq!(got.failed[0].backend, "site1");
        assert_eq!(
            *calls.lock().unwrap(),
            ["site1.latest", "site1.resolve", "site2.latest", "site2.resolve"]
        );
    }

    #[tokio::test]
    async fn mirror_outage_moves_on_to_next_backend() {
        let mut server = mockito::Server::new_async().await;
        let versions = server
            .mock("GET", "/youtube/com.google.android.youtube/versions")
            .with_status(503)
            .with_body("upstream unavailable")
            .expect(1)
            .create_async()
            .await;

        let calls = Calls::default();
        let apkpure_config = AppConfig {
            package: Some("com.google.android.youtube".to_string()),
            ..AppConfig::named("youtube")
        };
        let (_dir, configs) = store(&[
            ("apkpure", apkpure_config),
            ("site2", AppConfig::named("youtube")),
        ]);
        let options = FetchOptions::new(server.url()).with_throttle(Throttle::none());
        let acquirer = Acquirer::new(
            vec![
                Box::new(ApkPure::new(&server.url(), FetchClient::new(&options).unwrap())),
                FakeBackend::boxed("site2", Some("https://site2.example/app.apk"), "2.1.0", &calls),
            ],
            configs,
        );

        let got = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap();
        versions.assert_async().await;
        assert_eq!(got.candidate.backend, "site2");
        assert_eq!(got.candidate.url, "https://site2.example/app.apk");
        assert_eq!(got.failed.len(), 1);
        assert_eq!(got.failed[0].backend, "apkpure");
        match &got.failed[0].failure {
            AttemptFailure::ResolutionFailed { reason } => {
                assert!(reason.contains("HTTP 503"), "{reason}");
            }
            other => panic!("unexpected failure {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), ["site2.latest", "site2.resolve"]);
    }

    #[tokio::test]
    async fn first_success_stops_the_walk() {
        let calls = Calls::default();
        let (_dir, configs) = store(&[
            ("site1", AppConfig::named("youtube")),
            ("site2", AppConfig::named("youtube")),
        ]);
        let acquirer = Acquirer::new(
            vec![
                FakeBackend::boxed("site1", Some("https://site1.example/a.apk"), "1.0", &calls),
                FakeBackend::boxed("site2", Some("https://site2.example/b.apk"), "1.0", &calls),
            ],
            configs,
        );

        let got = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap();
        assert_eq!(got.candidate.backend, "site1");
        assert!(got.failed.is_empty());
        assert!(calls.lock().unwrap().iter().all(|c| c.starts_with("site1")));
    }

    #[tokio::test]
    async fn pinned_version_skips_discovery_and_arch_comes_from_config() {
        let calls = Calls::default();
        let config = AppConfig {
            version: Some(Version::new("18.0.1")),
            arch: Some(Arch::X86_64),
            ..AppConfig::named("youtube")
        };
        let (_dir, configs) = store(&[("site1", config)]);
        let acquirer = Acquirer::new(
            vec![FakeBackend::boxed("site1", Some("https://site1.example/a.apk"), "9.9", &calls)],
            configs,
        );

        let got = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap();
        assert_eq!(got.candidate.version, "18.0.1");
        assert_eq!(got.candidate.arch, Arch::X86_64);
        assert_eq!(*calls.lock().unwrap(), ["site1.resolve"]);

        let request = AcquireRequest::new("yt")
            .with_version(Some(Version::new("17.3.2")))
            .with_arch(Some(Arch::Arm64V8a));
        let got = acquirer.acquire(&request).await.unwrap();
        assert_eq!(got.candidate.version, "17.3.2");
        assert_eq!(got.candidate.arch, Arch::Arm64V8a);
    }

    #[tokio::test]
    async fn exhaustion_names_missing_configs() {
        let calls = Calls::default();
        let (dir, configs) = store(&[]);
        let acquirer = Acquirer::new(
            vec![
                FakeBackend::boxed("site1", None, "1.0", &calls),
                FakeBackend::boxed("site2", None, "1.0", &calls),
            ],
            configs,
        );

        let err = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap_err();
        assert!(err.is_unconfigured());
        assert_eq!(err.attempts().len(), 2);
        let report = err.to_string();
        let expected = dir.path().join("site1").join("yt.json");
        assert!(report.contains(&expected.display().to_string()), "{report}");
        assert!(report.contains("site2: no config"), "{report}");
        assert!(report.contains("hint: create"), "{report}");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhaustion_distinguishes_invalid_and_unresolved() {
        let calls = Calls::default();
        let (_dir, configs) = store(&[
            ("site1", AppConfig::named("broken")),
            ("site2", AppConfig::named("youtube")),
        ]);
        let acquirer = Acquirer::new(
            vec![
                FakeBackend::boxed("site1", None, "1.0", &calls),
                FakeBackend::boxed("site2", None, "1.0", &calls),
            ],
            configs,
        );

        let err = acquirer.acquire(&AcquireRequest::new("yt")).await.unwrap_err();
        assert!(!err.is_unconfigured());
        assert!(matches!(
            err.attempts()[0].failure,
            AttemptFailure::ConfigInvalid { .. }
        ));
        assert!(matches!(
            err.attempts()[1].failure,
            AttemptFailure::ResolutionFailed { .. }
        ));
        assert!(err.to_string().contains("download link not found"));
    }

    #[tokio::test]
    async fn no_backends_is_an_error() {
        let acquirer = Acquirer::new(Vec::new(), ConfigStore::default());
        assert!(matches!(
            acquirer.acquire(&AcquireRequest::new("yt")).await,
            Err(AcquireError::NoBackends)
        ));
    }

    #[tokio::test]
    async fn latest_versions_reports_each_backend() {
        let calls = Calls::default();
        let (_dir, configs) = store(&[("site2", AppConfig::named("youtube"))]);
        let acquirer = Acquirer::new(
            vec![
                FakeBackend::boxed("site1", None, "1.0", &calls),
                FakeBackend::boxed("site2", None, "3.4.5", &calls),
            ],
            configs,
        );

        let rows = acquirer.latest_versions("yt").await;
        assert!(matches!(rows[0].1, Err(AttemptFailure::ConfigMissing { .. })));
        assert_eq!(rows[1].1.as_ref().unwrap(), &Version::new("3.4.5"));
    }

    #[tokio::test]
    async fn download_needs_originating_backend() {
        let acquirer = Acquirer::new(Vec::new(), ConfigStore::default());
        let acquisition = Acquisition {
            candidate: DownloadCandidate::new(
                "https://elsewhere.example/a.apk",
                Version::new("1.0"),
                Arch::Universal,
                "elsewhere",
            )
            .unwrap(),
            failed: Vec::new(),
        };
        let dir = TempDir::new().unwrap();
        let err = acquirer
            .download(&acquisition, dir.path(), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnknownBackend(_)));
    }
}
