//! Uptodown: every app lives on its own subdomain with a versions listing
//! and one page per version. Packages are not split per ABI.

use async_trait::async_trait;
use regex::Regex;
use rvbuild_schema::{AppConfig, Arch, DownloadCandidate, Version};
use scraper::{Html, Selector};
use tracing::{info, warn};

use super::{Backend, BackendError, confirm_version, latest_from_page};
use crate::http::{FetchClient, Page};
use crate::parse::{Extractor, Rule, absolutize, element_text};

const DOWNLOAD_HOST: &str = "https://dw.uptodown.com/dwn/";

pub struct Uptodown {
    base: Option<String>,
    client: FetchClient,
}

impl Uptodown {
    pub const ID: &'static str = "uptodown";
    pub const REFERER: &'static str = "https://www.uptodown.com";

    /// `base_url` replaces the per-app `https://{name}.en.uptodown.com` site.
    pub fn new(base_url: Option<&str>, client: FetchClient) -> Self {
        Self {
            base: base_url.map(|b| b.trim_end_matches('/').to_string()),
            client,
        }
    }

    fn site(&self, config: &AppConfig) -> String {
        match &self.base {
            Some(base) => base.clone(),
            None => format!("https://{}.en.uptodown.com", config.name),
        }
    }
}

/// `data-url` of the listing row whose version label is exactly `version`.
fn row_url(listing: &Page, version: &Version) -> Option<String> {
    let doc = Html::parse_document(&listing.body);
    let rows = Selector::parse("div[data-url]").ok()?;
    let label = Selector::parse("span.version").ok()?;
    let found = doc.select(&rows).find_map(|row| {
        row.select(&label)
            .any(|l| element_text(&l) == version.as_str())
            .then(|| row.value().attr("data-url"))
            .flatten()
    });
    if let Some(href) = found {
        return absolutize(&listing.final_url, href);
    }

    // Markup changed: split the raw text at each `data-url` and look for
    // the version label before the next one.
    let anchor = Regex::new(r#"data-url="([^"]+)""#).ok()?;
    let label = Regex::new(&format!(
        r#"class="version"[^>]*>\s*{}\s*<"#,
        regex::escape(version.as_str())
    ))
    .ok()?;
    let anchors: Vec<_> = anchor.captures_iter(&listing.body).collect();
    for (i, caps) in anchors.iter().enumerate() {
        let (Some(whole), Some(href)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = anchors
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(listing.body.len(), |m| m.start());
        if label.is_match(&listing.body[whole.end()..end]) {
            warn!(%version, "listing row not found by selector, matched raw markup as fallback");
            return absolutize(&listing.final_url, &crate::parse::decode_entities(href.as_str()));
        }
    }
    None
}

#[async_trait]
impl Backend for Uptodown {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn latest_version(&self, config: &AppConfig) -> Result<Version, BackendError> {
        let url = format!("{}/android/versions", self.site(config));
        let page = self.client.fetch(&url).await?;
        let rules = Extractor::new("version list")
            .rule(Rule::text("div[data-url] span.version"))
            .rule(Rule::pattern(r#"class="version"[^>]*>\s*([^<]+?)\s*<"#));
        let version = latest_from_page(&page, &rules)?;
        info!(backend = Self::ID, %version, "latest stable version");
        Ok(version)
    }

    async fn resolve(
        &self,
        config: &AppConfig,
        version: &Version,
        arch: Arch,
    ) -> Result<DownloadCandidate, BackendError> {
        let site = self.site(config);
        let listing = self.client.fetch(&format!("{site}/android/versions")).await?;
        let version_url = match row_url(&listing, version) {
            Some(url) => url,
            None => {
                let url = format!("{site}/android/download");
                warn!(%version, %url, "version not in listing, trying current download page as fallback");
                url
            }
        };

        let page = self.client.fetch(&version_url).await?;
        confirm_version(&page, version)?;

        let rules = Extractor::new("download token")
            .rule(Rule::attr("button#detail-download-button", "data-url"))
            .rule(Rule::pattern(r#"(https://dw\.uptodown\.com/dwn/[^"'\s<>]+)"#));
        let url = match rules.first(&page.body) {
            Some(hit) if hit.value.starts_with("http") => hit.value,
            Some(hit) => format!("{DOWNLOAD_HOST}{}", hit.value.trim_start_matches('/')),
            None => {
                return Err(BackendError::ParseMiss {
                    what: rules.what(),
                    url: page.final_url.clone(),
                });
            }
        };

        info!(backend = Self::ID, %url, %arch, "resolved download link");
        Ok(DownloadCandidate::new(url, version.clone(), arch, Self::ID)?)
    }

    fn client(&self) -> &FetchClient {
        &self.client
    }
}
