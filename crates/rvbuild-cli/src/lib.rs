//! rvbuild - source APK acquisition
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Finds and downloads the unpatched APK for an app from third-party
//! mirrors, trying APKMirror, APKPure and Uptodown in that order.
//!
//! # Layout
//!
//! ```text
//! apps/
//! ├── apkmirror/youtube.json   # {"org": "google-inc", "name": "youtube"}
//! ├── apkpure/youtube.json     # {"name": "youtube", "package": "com.google.android.youtube"}
//! └── uptodown/youtube.json    # {"name": "youtube"}
//! arch-config.json             # [{"app_name", "source", "arches": [...]}]
//! ```

pub mod cmd;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rvbuild_core::http::BROWSER_USER_AGENT;
use rvbuild_core::{
    Acquirer, BackendKind, BackendSettings, ChallengeSolver, ConfigStore, Throttle, WebDriverSolver,
};
use rvbuild_schema::{Arch, Version};

#[derive(Debug, Parser)]
#[command(name = "rvbuild")]
#[command(author, version, about = "rvbuild - fetch source APKs for patching")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Directory holding `<backend>/<app>.json` configs
    #[arg(long, env = "RVBUILD_APPS_DIR", default_value = "apps", global = true)]
    pub apps_dir: PathBuf,

    /// Per-app architecture matrix
    #[arg(
        long,
        env = "RVBUILD_ARCH_CONFIG",
        default_value = "arch-config.json",
        global = true
    )]
    pub arch_config: PathBuf,

    /// Patch-source label, used for the matrix lookup and output names
    #[arg(long, env = "SOURCE", global = true)]
    pub source: Option<String>,

    /// Proxy for every mirror request
    #[arg(long, env = "RVBUILD_PROXY", global = true)]
    pub proxy: Option<String>,

    /// Cookie (`name=value`) to seed into every mirror session; repeatable
    #[arg(long = "cookie", env = "RVBUILD_COOKIE", global = true)]
    pub cookies: Vec<String>,

    /// User agent matching the browser the cookies came from
    #[arg(long, env = "RVBUILD_USER_AGENT", global = true)]
    pub user_agent: Option<String>,

    /// Mirror to try, in order; repeatable (default: apkmirror, apkpure, uptodown)
    #[arg(long = "backend", value_name = "ID", global = true)]
    pub backends: Vec<BackendKind>,

    /// Skip the delay between requests (local mirrors only)
    #[arg(long, global = true)]
    pub no_throttle: bool,

    /// WebDriver server (e.g. chromedriver at http://localhost:9515) used to
    /// get past anti-bot challenge pages
    #[arg(long, env = "RVBUILD_WEBDRIVER", value_name = "URL", global = true)]
    pub webdriver: Option<String>,

    /// Run the challenge browser headless
    #[arg(long, global = true)]
    pub webdriver_headless: bool,

    /// Seconds to wait for a challenge to clear in the browser
    #[arg(long, value_name = "SECS", default_value_t = 30, global = true)]
    pub webdriver_timeout: u64,
}

impl GlobalArgs {
    pub fn settings(&self) -> BackendSettings {
        BackendSettings {
            proxy: self.proxy.clone(),
            throttle: if self.no_throttle {
                Throttle::none()
            } else {
                Throttle::default()
            },
            cookies: self.cookies.clone(),
            user_agent: self.user_agent.clone(),
            solver: self.solver(),
        }
    }

    fn solver(&self) -> Option<Arc<dyn ChallengeSolver>> {
        let endpoint = self.webdriver.as_deref()?;
        let solver: Arc<dyn ChallengeSolver> = Arc::new(
            WebDriverSolver::new(endpoint)
                .headless(self.webdriver_headless)
                .with_timeout(Duration::from_secs(self.webdriver_timeout)),
        );
        Some(solver)
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        if self.backends.is_empty() {
            BackendKind::PRIORITY.to_vec()
        } else {
            self.backends.clone()
        }
    }

    pub fn acquirer(&self) -> anyhow::Result<Acquirer> {
        if self.user_agent.is_none() && !self.cookies.is_empty() {
            tracing::warn!(
                user_agent = BROWSER_USER_AGENT,
                "cookies seeded without --user-agent; clearance cookies only work with the browser that earned them"
            );
        }
        Ok(Acquirer::from_kinds(
            &self.kinds(),
            &self.settings(),
            ConfigStore::new(&self.apps_dir),
        )?)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the latest stable version each mirror lists
    Latest {
        /// App name (config file stem)
        #[arg(env = "APP_NAME")]
        app: String,
    },
    /// Resolve a download URL without downloading
    Resolve {
        /// App name (config file stem)
        #[arg(env = "APP_NAME")]
        app: String,
        /// Architecture; unknown values mean universal
        #[arg(long, value_parser = parse_arch)]
        arch: Option<Arch>,
        /// Version to resolve instead of the latest stable one
        #[arg(long, value_parser = parse_version)]
        version: Option<Version>,
        /// Print the candidate as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download the APK for every configured architecture
    Fetch {
        /// App name (config file stem)
        #[arg(env = "APP_NAME")]
        app: String,
        /// Single architecture instead of the matrix
        #[arg(long, value_parser = parse_arch)]
        arch: Option<Arch>,
        /// Version to fetch instead of the latest stable one
        #[arg(long, value_parser = parse_version)]
        version: Option<Version>,
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[allow(clippy::unnecessary_wraps)]
fn parse_arch(s: &str) -> Result<Arch, String> {
    Ok(Arch::parse_or_universal(s))
}

fn parse_version(s: &str) -> Result<Version, String> {
    let version = Version::new(s);
    if version.segments().is_empty() {
        return Err(format!("not a version: {s}"));
    }
    Ok(version)
}
