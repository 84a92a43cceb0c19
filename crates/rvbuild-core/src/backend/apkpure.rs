//! APKPure: version list plus one download page per version.

use async_trait::async_trait;
use rvbuild_schema::{AppConfig, Arch, DownloadCandidate, Version};
use tracing::{info, warn};

use super::{Backend, BackendError, confirm_version, extract_link, latest_from_page};
use crate::config::ConfigError;
use crate::http::FetchClient;
use crate::parse::{Extractor, Rule, VariantQuery, find_variant_link};

pub struct ApkPure {
    base: String,
    client: FetchClient,
}

impl ApkPure {
    pub const ID: &'static str = "apkpure";
    pub const BASE_URL: &'static str = "https://apkpure.net";

    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn package<'a>(&self, config: &'a AppConfig) -> Result<&'a str, ConfigError> {
        config
            .package
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                backend: Self::ID.to_string(),
                field: "package",
            })
    }
}

#[async_trait]
impl Backend for ApkPure {
    fn id(&self) -> &str {
        Self::ID
    }

    fn validate(&self, config: &AppConfig) -> Result<(), ConfigError> {
        self.package(config).map(|_| ())
    }

    async fn latest_version(&self, config: &AppConfig) -> Result<Version, BackendError> {
        let package = self.package(config)?;
        let url = format!("{}/{}/{package}/versions", self.base, config.name);
        let page = self.client.fetch(&url).await?;
        let rules = Extractor::new("version list")
            .rule(Rule::attr("div.ver-top-down", "data-dt-version"))
            .rule(Rule::attr("[data-dt-version]", "data-dt-version"))
            .rule(Rule::pattern(r#"data-dt-version="([^"]+)""#));
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
        let package = self.package(config)?;
        let url = format!("{}/{}/{package}/download/{version}", self.base, config.name);
        let mut page = self.client.fetch(&url).await?;
        confirm_version(&page, version)?;

        if arch != Arch::Universal {
            let query = VariantQuery {
                arch,
                dpi: config.dpi.as_deref(),
                href_contains: Some("/download"),
            };
            match find_variant_link(&page.body, &page.final_url, &query) {
                Some(variant) if variant != page.final_url => {
                    page = self.client.fetch(&variant).await?;
                    confirm_version(&page, version)?;
                }
                Some(_) => {}
                None => {
                    warn!(%arch, url = %page.final_url, "no variant names the architecture, using default download");
                }
            }
        }

        let rules = Extractor::new("download link")
            .rule(Rule::attr("a#download_link", "href"))
            .rule(Rule::attr("a.download-start-btn", "href"))
            .rule(Rule::pattern(
                r#"(https://d\.apkpure\.(?:net|com)/b/(?:APK|XAPK)/[^"'\s<>]+)"#,
            ));
        let url = extract_link(&page, &rules)?;

        info!(backend = Self::ID, %url, "resolved download link");
        Ok(DownloadCandidate::new(url, version.clone(), arch, Self::ID)?)
    }

    fn client(&self) -> &FetchClient {
        &self.client
    }
}
