//! Where updates come from

use async_trait::async_trait;
use patchline_core::types::{NetworkConfig, RuntimeConfig};
use patchline_core::utils::clean_text;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, UpdateError};

/// Build the HTTP client shared by the source and the downloader
pub fn http_client(network: &NetworkConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&network.user_agent)
        .connect_timeout(network.connect_timeout())
        .read_timeout(network.read_timeout())
        .build()
        .map_err(UpdateError::from)
}

/// Remote endpoints of an update feed
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Raw latest-version token
    async fn fetch_version_token(&self) -> Result<String>;

    /// Location of the update archive
    fn archive_url(&self) -> &str;

    /// Expected hex SHA-256 of the archive, if the feed publishes one
    async fn fetch_checksum(&self) -> Result<Option<String>>;
}

/// An update feed served over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    version_url: String,
    archive_url: String,
    checksum_url: Option<String>,
    request_timeout: Duration,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, version_url: impl Into<String>, archive_url: impl Into<String>) -> Self {
        Self {
            client,
            version_url: version_url.into(),
            archive_url: archive_url.into(),
            checksum_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Build from the `source` and `network` sections of the runtime config
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let version_url = config
            .source
            .version_url
            .clone()
            .ok_or_else(|| patchline_core::Error::missing_field("source.version-url"))?;
        let archive_url = config
            .source
            .archive_url
            .clone()
            .ok_or_else(|| patchline_core::Error::missing_field("source.archive-url"))?;

        let mut source = Self::new(http_client(&config.network)?, version_url, archive_url)
            .with_request_timeout(config.network.http_timeout());
        source.checksum_url = config.source.checksum_url.clone();
        Ok(source)
    }

    pub fn with_checksum_url(mut self, url: impl Into<String>) -> Self {
        self.checksum_url = Some(url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url = %url, "fetching");
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::network(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl UpdateSource for HttpSource {
    async fn fetch_version_token(&self) -> Result<String> {
        self.get_text(&self.version_url).await
    }

    fn archive_url(&self) -> &str {
        &self.archive_url
    }

    async fn fetch_checksum(&self) -> Result<Option<String>> {
        let Some(url) = &self.checksum_url else {
            return Ok(None);
        };
        let body = self.get_text(url).await?;
        parse_checksum(&body).map(Some)
    }
}

/// Accepts a bare digest or `sha256sum` output (`<digest>  <file>`)
pub fn parse_checksum(body: &str) -> Result<String> {
    let digest = clean_text(body)
        .split_whitespace()
        .next()
        .unwrap_or_default();

    match hex::decode(digest) {
        Ok(bytes) if bytes.len() == 32 => Ok(digest.to_ascii_lowercase()),
        Ok(_) => Err(UpdateError::format(
            "checksum",
            digest,
            "expected 64 hex characters",
        )),
        Err(e) => Err(UpdateError::format("checksum", digest, e.to_string())),
    }
}
