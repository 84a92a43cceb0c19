//! Browser-like HTTP session used by every mirror backend.
//!
//! Mirrors block obvious bots, so each request carries a desktop Chrome
//! header set and waits a randomized delay first. One [`FetchClient`] is
//! one session: cookies picked up while walking a release page chain stay
//! in its jar. Backends never share a client.
//!
//! An anti-bot interstitial is a [`FetchError::Challenge`] unless the
//! session has a [`ChallengeSolver`], in which case the solver loads the
//! page in a browser and its clearance cookies are copied into the jar.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::solver::ChallengeSolver;

/// Desktop Chrome on Windows, the profile the mirrors serve real pages to.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

/// Body fragments that only appear on anti-bot interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "<title>Just a moment...</title>",
    "cf-browser-verification",
    "/cdn-cgi/challenge-platform/",
    "window._cf_chl_opt",
    "cf_chl_opt",
];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Anti-bot challenge served for {url}")]
    Challenge { url: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Browser could not load {url}: {reason}")]
    Browser { url: String, reason: String },
}

/// Delay awaited before every request: `floor` plus a uniformly random
/// fraction of `jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub floor: Duration,
    pub jitter: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(3),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Throttle {
    /// No delay. For local mirrors and tests.
    pub const fn none() -> Self {
        Self {
            floor: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Draw the next delay.
    pub fn delay(&self) -> Duration {
        self.floor + self.jitter.mul_f64(rand::random::<f64>())
    }

    async fn wait(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            debug!(?delay, "throttling");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Session settings for one backend.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Site root; sent as `Referer` and used as the scope of seeded cookies.
    pub base_url: String,
    /// Proxy for all schemes. When unset, system proxy variables are ignored.
    pub proxy: Option<String>,
    pub throttle: Throttle,
    pub timeout: Duration,
    /// `name=value` cookies seeded into the jar, e.g. a clearance cookie
    /// copied from a browser that already passed the site's challenge.
    pub cookies: Vec<String>,
    /// Must match the browser the seeded cookies came from.
    pub user_agent: Option<String>,
    /// Browser used when a page turns out to be a challenge.
    pub solver: Option<Arc<dyn ChallengeSolver>>,
}

impl FetchOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            proxy: None,
            throttle: Throttle::default(),
            timeout: Duration::from_secs(30),
            cookies: Vec::new(),
            user_agent: None,
            solver: None,
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_solver(mut self, solver: Option<Arc<dyn ChallengeSolver>>) -> Self {
        self.solver = solver;
        self
    }
}

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub body: String,
    /// URL after redirects; relative links on the page resolve against it.
    pub final_url: String,
}

#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    throttle: Throttle,
    jar: Arc<Jar>,
    user_agent: String,
    solver: Option<Arc<dyn ChallengeSolver>>,
}

impl FetchClient {
    /// Build a session from `options`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] when `base_url` or `proxy` cannot be
    /// parsed, or [`FetchError::Http`] when the TLS backend fails to
    /// initialise.
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        let base = Url::parse(&options.base_url).map_err(|e| FetchError::InvalidUrl {
            url: options.base_url.clone(),
            reason: e.to_string(),
        })?;

        let jar = Arc::new(Jar::default());
        for cookie in &options.cookies {
            jar.add_cookie_str(cookie, &base);
        }

        let user_agent = options.user_agent.as_deref().unwrap_or(BROWSER_USER_AGENT);
        let mut builder = Client::builder()
            .default_headers(browser_headers(&options.base_url))
            .user_agent(user_agent)
            .cookie_provider(Arc::clone(&jar))
            .timeout(options.timeout);

        builder = match &options.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy).map_err(|e| {
                FetchError::InvalidUrl {
                    url: proxy.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            throttle: options.throttle,
            jar,
            user_agent: user_agent.to_string(),
            solver: options.solver.clone(),
        })
    }

    /// GET an HTML page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Challenge`] when the site served an anti-bot
    /// interstitial that no solver got past, [`FetchError::Browser`] when the
    /// solver itself failed, [`FetchError::Status`] for any other non-2xx
    /// status and [`FetchError::Http`] for transport failures. The URL is
    /// never re-requested over HTTP.
    pub async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let response = self.send(url).await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let challenged_by_header = response
            .headers()
            .get("cf-mitigated")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"challenge"));
        let body = response.text().await?;

        info!(url = %final_url, status = status.as_u16(), bytes = body.len(), "fetched");

        if challenged_by_header || is_challenge(status, &body) {
            return self.pass_challenge(final_url).await;
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        Ok(Page {
            status: status.as_u16(),
            body,
            final_url,
        })
    }

    /// GET a file for streaming, through the same session and throttle.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`FetchClient::fetch`]; challenge detection is
    /// limited to the `cf-mitigated` header since the body is not read.
    pub async fn download(&self, url: &str) -> Result<Response, FetchError> {
        let response = self.send(url).await?;
        let status = response.status();
        if response
            .headers()
            .get("cf-mitigated")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"challenge"))
        {
            return Err(FetchError::Challenge {
                url: response.url().to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    async fn pass_challenge(&self, url: String) -> Result<Page, FetchError> {
        let Some(solver) = &self.solver else {
            return Err(FetchError::Challenge { url });
        };
        warn!(%url, "anti-bot challenge, handing the page to the browser");
        let solved = solver.solve(&url, &self.user_agent).await?;
        if is_challenge(StatusCode::OK, &solved.body) {
            return Err(FetchError::Challenge { url });
        }

        let scope = Url::parse(&solved.final_url).map_err(|e| FetchError::InvalidUrl {
            url: solved.final_url.clone(),
            reason: e.to_string(),
        })?;
        for (name, value) in &solved.cookies {
            self.jar.add_cookie_str(&format!("{name}={value}; Path=/"), &scope);
        }
        info!(url = %solved.final_url, cookies = solved.cookies.len(), "challenge passed in browser");

        Ok(Page {
            status: StatusCode::OK.as_u16(),
            body: solved.body,
            final_url: solved.final_url,
        })
    }

    async fn send(&self, url: &str) -> Result<Response, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        self.throttle.wait().await;
        debug!(%url, "GET");
        Ok(self.client.get(parsed).send().await?)
    }
}

fn browser_headers(referer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(header::REFERER, value);
    }
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers
}

/// True when `body` is an anti-bot interstitial rather than the real page.
pub fn is_challenge(status: StatusCode, body: &str) -> bool {
    let marked = CHALLENGE_MARKERS.iter().any(|m| body.contains(m));
    // A real page may link the challenge script; only trust markers on
    // blocking statuses or on tiny bodies.
    marked
        && (matches!(status.as_u16(), 403 | 429 | 503) || body.len() < 16 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolvedPage;
    use mockito::Server;

    fn client(server: &Server) -> FetchClient {
        FetchClient::new(&FetchOptions::new(server.url()).with_throttle(Throttle::none())).unwrap()
    }

    #[test]
    fn throttle_delay_stays_within_bounds() {
        let throttle = Throttle {
            floor: Duration::from_millis(300),
            jitter: Duration::from_millis(100),
        };
        for _ in 0..50 {
            let d = throttle.delay();
            assert!(d >= Duration::from_millis(300));
            assert!(d < Duration::from_millis(400));
        }
        assert_eq!(Throttle::none().delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn fetch_sends_browser_headers() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/page")
            .match_header("user-agent", BROWSER_USER_AGENT)
            .match_header("accept-language", "en-US,en;q=0.9")
            .match_header("referer", mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><title>ok</title></html>")
            .create_async()
            .await;

        let page = client(&server)
            .fetch(&format!("{}/page", server.url()))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("ok"));
        assert!(page.final_url.ends_with("/page"));
    }

    #[tokio::test]
    async fn non_success_status_is_recoverable_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;

        let err = client(&server)
            .fetch(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn challenge_page_is_detected() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/guarded")
            .with_status(403)
            .with_body(
                "<html><head><title>Just a moment...</title></head>\
                 <script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate\"></script></html>",
            )
            .create_async()
            .await;

        let err = client(&server)
            .fetch(&format!("{}/guarded", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Challenge { .. }));
    }

    const CHALLENGE_BODY: &str = "<html><head><title>Just a moment...</title></head>\
         <script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate\"></script></html>";

    #[derive(Debug)]
    struct FakeBrowser {
        body: &'static str,
        seen: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl ChallengeSolver for FakeBrowser {
        async fn solve(&self, url: &str, user_agent: &str) -> Result<SolvedPage, FetchError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), user_agent.to_string()));
            Ok(SolvedPage {
                final_url: url.to_string(),
                body: self.body.to_string(),
                cookies: vec![("cf_clearance".to_string(), "s0lved".to_string())],
            })
        }
    }

    fn solving_client(server: &Server, browser: &Arc<FakeBrowser>) -> FetchClient {
        let solver: Arc<dyn ChallengeSolver> = browser.clone();
        let options = FetchOptions::new(server.url())
            .with_throttle(Throttle::none())
            .with_solver(Some(solver));
        FetchClient::new(&options).unwrap()
    }

    #[tokio::test]
    async fn solver_clears_challenge_and_shares_its_cookies() {
        let mut server = Server::new_async().await;
        let guarded = server
            .mock("GET", "/guarded")
            .with_status(403)
            .with_header("cf-mitigated", "challenge")
            .with_body(CHALLENGE_BODY)
            .expect(1)
            .create_async()
            .await;
        let next = server
            .mock("GET", "/next")
            .match_header("cookie", "cf_clearance=s0lved")
            .with_body("second page")
            .expect(1)
            .create_async()
            .await;

        let browser = Arc::new(FakeBrowser {
            body: "<html><title>YouTube 19.16.39</title></html>",
            seen: std::sync::Mutex::default(),
        });
        let client = solving_client(&server, &browser);

        let page = client
            .fetch(&format!("{}/guarded", server.url()))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("19.16.39"));
        assert_eq!(
            *browser.seen.lock().unwrap(),
            [(format!("{}/guarded", server.url()), BROWSER_USER_AGENT.to_string())]
        );

        let page = client.fetch(&format!("{}/next", server.url())).await.unwrap();
        assert_eq!(page.body, "second page");
        guarded.assert_async().await;
        next.assert_async().await;
    }

    #[tokio::test]
    async fn challenge_the_browser_cannot_clear_is_still_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/guarded")
            .with_status(503)
            .with_body(CHALLENGE_BODY)
            .create_async()
            .await;

        let browser = Arc::new(FakeBrowser {
            body: CHALLENGE_BODY,
            seen: std::sync::Mutex::default(),
        });
        let err = solving_client(&server, &browser)
            .fetch(&format!("{}/guarded", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Challenge { .. }));
        assert_eq!(browser.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn seeded_cookies_are_sent() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .match_header("cookie", "cf_clearance=abc123")
            .with_status(200)
            .with_body("welcome")
            .create_async()
            .await;

        let options = FetchOptions::new(server.url())
            .with_throttle(Throttle::none())
            .with_cookies(vec!["cf_clearance=abc123".to_string()]);
        let page = FetchClient::new(&options)
            .unwrap()
            .fetch(&format!("{}/", server.url()))
            .await
            .unwrap();
        assert_eq!(page.body, "welcome");
    }

    #[test]
    fn large_page_linking_challenge_script_is_not_a_challenge() {
        let body = format!("{}{}", "x".repeat(20 * 1024), "/cdn-cgi/challenge-platform/");
        assert!(!is_challenge(StatusCode::OK, &body));
        assert!(is_challenge(StatusCode::SERVICE_UNAVAILABLE, &body));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let options = FetchOptions::new("not a url");
        assert!(matches!(
            FetchClient::new(&options),
            Err(FetchError::InvalidUrl { .. })
        ));
    }
}
