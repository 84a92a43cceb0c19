//! Per-app mirror configs and the architecture build matrix.
//!
//! Configs live on disk as `apps/<backend>/<app>.json`. They are read once
//! per request, before any network activity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rvbuild_schema::{AppConfig, ArchMatrix};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config at {}", path.display())]
    Missing { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{field}` is required by {backend}")]
    MissingField {
        backend: String,
        field: &'static str,
    },

    #[error("Invalid app name {0:?}")]
    InvalidName(String),
}

impl ConfigError {
    /// True when there simply is no config, as opposed to a broken one.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// Where per-app configs are looked up.
///
/// Entries added with [`ConfigStore::with_config`] shadow files on disk.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    root: PathBuf,
    overrides: HashMap<(String, String), AppConfig>,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, backend: &str, app: &str, config: AppConfig) -> Self {
        self.overrides
            .insert((backend.to_string(), app.to_string()), config);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expected location of the config for `app` on `backend`.
    pub fn path_for(&self, backend: &str, app: &str) -> PathBuf {
        self.root.join(backend).join(format!("{app}.json"))
    }

    /// Load the config for `app` on `backend`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when there is no file, [`ConfigError::Io`] or
    /// [`ConfigError::Parse`] when it cannot be read, and
    /// [`ConfigError::InvalidName`] for app names that are not a plain file
    /// stem.
    pub fn load(&self, backend: &str, app: &str) -> Result<AppConfig, ConfigError> {
        if app.is_empty() || app.contains(['/', '\\']) || app.starts_with('.') {
            return Err(ConfigError::InvalidName(app.to_string()));
        }
        if let Some(config) = self.overrides.get(&(backend.to_string(), app.to_string())) {
            return Ok(config.clone());
        }

        let path = self.path_for(backend, app);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config");
                return Err(ConfigError::Missing { path });
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        AppConfig::from_json(&text).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Load `arch-config.json`; a missing file is an empty matrix.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] when the file
/// exists but cannot be used.
pub fn load_arch_matrix(path: &Path) -> Result<ArchMatrix, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => ArchMatrix::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "arch matrix not found, building universal only");
            Ok(ArchMatrix::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
