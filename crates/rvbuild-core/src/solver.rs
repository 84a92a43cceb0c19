//! Getting past JavaScript anti-bot interstitials with a real browser.
//!
//! A plain HTTP session cannot run the challenge script. When a solver is
//! configured, [`FetchClient`](crate::http::FetchClient) hands the
//! challenged URL to it, takes the rendered page as the response and copies
//! the browser's clearance cookies into its own jar so later requests in
//! the chain pass without the browser.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thirtyfour::ChromiumLikeCapabilities;
use thirtyfour::prelude::*;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::http::{FetchError, is_challenge};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The real page behind a challenge plus the cookies that unlocked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedPage {
    pub final_url: String,
    pub body: String,
    /// `(name, value)` pairs, clearance cookies included.
    pub cookies: Vec<(String, String)>,
}

/// Something that can load a challenged URL the way a browser does.
#[async_trait]
pub trait ChallengeSolver: Send + Sync + std::fmt::Debug {
    /// Load `url` with `user_agent` and wait for the interstitial to clear.
    ///
    /// `user_agent` must be the one the HTTP session sends, since clearance
    /// cookies are bound to it.
    async fn solve(&self, url: &str, user_agent: &str) -> Result<SolvedPage, FetchError>;
}

/// Drives Chrome through a running WebDriver server (`chromedriver`).
#[derive(Debug, Clone)]
pub struct WebDriverSolver {
    endpoint: String,
    headless: bool,
    timeout: Duration,
}

impl WebDriverSolver {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headless: false,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Headless Chrome is flagged by some sites; off by default.
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Navigate and poll the DOM until the challenge markers are gone.
    /// `None` when the deadline passes first.
    async fn visit(&self, driver: &WebDriver, url: &str) -> WebDriverResult<Option<SolvedPage>> {
        driver.goto(url).await?;
        let deadline = Instant::now() + self.timeout;
        loop {
            let body = driver.source().await?;
            if !is_challenge(StatusCode::OK, &body) {
                let final_url = driver.current_url().await?.to_string();
                let cookies = driver
                    .get_all_cookies()
                    .await?
                    .into_iter()
                    .map(|c| (c.name, c.value))
                    .collect();
                return Ok(Some(SolvedPage {
                    final_url,
                    body,
                    cookies,
                }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            debug!(%url, "challenge still showing");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn browser_error(url: &str, e: impl std::fmt::Display) -> FetchError {
    FetchError::Browser {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ChallengeSolver for WebDriverSolver {
    async fn solve(&self, url: &str, user_agent: &str) -> Result<SolvedPage, FetchError> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.set_headless().map_err(|e| browser_error(url, e))?;
        }
        caps.add_arg(&format!("--user-agent={user_agent}"))
            .map_err(|e| browser_error(url, e))?;

        info!(%url, endpoint = %self.endpoint, "opening browser session");
        let driver = WebDriver::new(self.endpoint.as_str(), caps)
            .await
            .map_err(|e| browser_error(url, e))?;
        let visited = self.visit(&driver, url).await;
        if let Err(e) = driver.quit().await {
            warn!(error = %e, "browser session did not close cleanly");
        }

        match visited.map_err(|e| browser_error(url, e))? {
            Some(page) => Ok(page),
            None => {
                warn!(%url, timeout = ?self.timeout, "challenge did not clear in the browser");
                Err(FetchError::Challenge {
                    url: url.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let solver = WebDriverSolver::new("http://localhost:9515")
            .headless(true)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(solver.endpoint(), "http://localhost:9515");
        assert!(solver.headless);
        assert_eq!(solver.timeout, Duration::from_secs(5));
        assert_eq!(
            WebDriverSolver::new("x").timeout,
            WebDriverSolver::DEFAULT_TIMEOUT
        );
    }
}
