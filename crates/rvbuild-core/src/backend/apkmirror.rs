//! APKMirror: release page, then per-ABI variant page, then a download
//! landing page whose link carries a short-lived key.

use async_trait::async_trait;
use rvbuild_schema::{AppConfig, Arch, DownloadCandidate, Version};
use tracing::{info, warn};

use super::{Backend, BackendError, confirm_version, extract_link, latest_from_page};
use crate::config::ConfigError;
use crate::http::{FetchClient, Page};
use crate::parse::{Extractor, Rule, VariantQuery, find_variant_link};

pub struct ApkMirror {
    base: String,
    client: FetchClient,
}

impl ApkMirror {
    pub const ID: &'static str = "apkmirror";
    pub const BASE_URL: &'static str = "https://www.apkmirror.com";

    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn org<'a>(&self, config: &'a AppConfig) -> Result<&'a str, ConfigError> {
        config.org.as_deref().ok_or_else(|| ConfigError::MissingField {
            backend: Self::ID.to_string(),
            field: "org",
        })
    }

    fn release_url(&self, org: &str, config: &AppConfig, version: &Version) -> String {
        format!(
            "{}/apk/{org}/{}/{}-{}-release/",
            self.base,
            config.name,
            config.release_name(),
            version.dashed()
        )
    }

    /// Variant page for `arch`, found by scanning the release page. When no
    /// row names the architecture, the numbered upload slug is guessed.
    fn variant_url(
        release: &Page,
        release_url: &str,
        config: &AppConfig,
        version: &Version,
        arch: Arch,
    ) -> String {
        let query = VariantQuery {
            arch,
            dpi: config.dpi.as_deref(),
            href_contains: Some("-android-apk-download"),
        };
        if let Some(url) = find_variant_link(&release.body, &release.final_url, &query) {
            return url;
        }
        let suffix = arch.suffix_hint().map(|n| format!("-{n}")).unwrap_or_default();
        let guess = format!(
            "{release_url}{}-{}{suffix}-android-apk-download/",
            config.release_name(),
            version.dashed()
        );
        warn!(%arch, url = %guess, "no variant row names the architecture, guessing numbered slug as fallback");
        guess
    }

    fn landing_url(variant: &Page) -> String {
        let rules = Extractor::new("download button")
            .rule(Rule::attr("a.downloadButton", "href"))
            .rule(Rule::pattern(r#"href="([^"]*/download/\?key=[^"]+)""#));
        if let Ok(url) = extract_link(variant, &rules) {
            return url;
        }
        let mut base = variant.final_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = format!("{base}download/?forcebaseapk=true");
        warn!(%url, "no download button, using constructed landing link as fallback");
        url
    }
}

fn final_link_rules() -> Extractor {
    Extractor::new("download link")
        .rule(Rule::attr("a#download-link", "href"))
        .rule(Rule::pattern(r#"([^"'\s<>]*download\.php\?id=[^"'\s<>]+)"#))
}

#[async_trait]
impl Backend for ApkMirror {
    fn id(&self) -> &str {
        Self::ID
    }

    fn validate(&self, config: &AppConfig) -> Result<(), ConfigError> {
        self.org(config).map(|_| ())
    }

    async fn latest_version(&self, config: &AppConfig) -> Result<Version, BackendError> {
        let url = format!("{}/uploads/?appcategory={}", self.base, config.name);
        let page = self.client.fetch(&url).await?;
        let rules = Extractor::new("release titles")
            .rule(Rule::text("div.appRow h5.appRowTitle a"))
            .rule(Rule::pattern(format!(
                r"/{}-(\d+(?:-\d+)+)-release/",
                regex::escape(config.release_name())
            )));
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
        let org = self.org(config)?;
        let release_url = self.release_url(org, config, version);
        let release = self.client.fetch(&release_url).await?;
        confirm_version(&release, version)?;

        let variant_url = Self::variant_url(&release, &release_url, config, version, arch);
        let variant = self.client.fetch(&variant_url).await?;
        confirm_version(&variant, version)?;

        let landing = self.client.fetch(&Self::landing_url(&variant)).await?;
        let url = extract_link(&landing, &final_link_rules())?;

        info!(backend = Self::ID, %url, "resolved download link");
        Ok(DownloadCandidate::new(url, version.clone(), arch, Self::ID)?)
    }

    fn client(&self) -> &FetchClient {
        &self.client
    }
}
