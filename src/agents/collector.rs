//! The collect capability: confirm a discovered item's media is reachable
//! and settle its collection-time metadata before enrichment.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use radio_cortex_core::error::CollaboratorError;
use radio_cortex_core::license::{parse_license, LicenseKind};
use radio_cortex_core::models::{Capability, Item, ItemPatch};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{Agent, Outcome};
use crate::config::FetcherConfig;
use crate::http;

/// What a fetcher learned about an item's media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    /// Final location of the media after redirects.
    pub media_url: String,
    pub duration_secs: Option<i64>,
}

/// Verifies or resolves the media location of an item.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, item: &Item) -> Result<MediaInfo, CollaboratorError>;
}

fn media_location(item: &Item) -> &str {
    item.media_url.as_deref().unwrap_or(&item.source_url)
}

/// Accepts the recorded location as-is. No network access.
pub struct PassthroughFetcher;

#[async_trait]
impl MediaFetcher for PassthroughFetcher {
    async fn fetch(&self, item: &Item) -> Result<MediaInfo, CollaboratorError> {
        Ok(MediaInfo {
            media_url: media_location(item).to_string(),
            duration_secs: None,
        })
    }
}

/// Probes the media location with an HTTP `HEAD` request.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, item: &Item) -> Result<MediaInfo, CollaboratorError> {
        let location = media_location(item);
        let response = self
            .client
            .head(location)
            .send()
            .await
            .map_err(|e| http::transport_error("media probe", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CollaboratorError::Terminal(format!(
                "media gone ({}) at {}",
                status, location
            )));
        }
        if !status.is_success() {
            return Err(http::status_error("media probe", status, ""));
        }

        // Some archives advertise the running time for audio/video.
        let duration_secs = response
            .headers()
            .get("x-content-duration")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|secs| secs.round() as i64);

        Ok(MediaInfo {
            media_url: response.url().to_string(),
            duration_secs,
        })
    }
}

pub fn create_fetcher(config: &FetcherConfig) -> Result<Box<dyn MediaFetcher>> {
    match config.provider.as_str() {
        "none" => Ok(Box::new(PassthroughFetcher)),
        "http" => Ok(Box::new(HttpFetcher::new(Duration::from_secs(
            config.timeout_secs,
        ))?)),
        other => bail!("Unknown fetcher provider: {}", other),
    }
}

pub struct CollectorAgent {
    fetcher: Box<dyn MediaFetcher>,
}

impl CollectorAgent {
    pub fn new(fetcher: Box<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Agent for CollectorAgent {
    fn capability(&self) -> Capability {
        Capability::Collect
    }

    async fn process(&self, item: &Item) -> Outcome {
        let info = match self.fetcher.fetch(item).await {
            Ok(info) => info,
            Err(e) => return e.into(),
        };

        let mut patch = ItemPatch::default();
        if item.media_url.as_deref() != Some(info.media_url.as_str()) {
            patch.media_url = Some(info.media_url);
        }
        if item.duration_secs.is_none() {
            patch.duration_secs = info.duration_secs;
        }
        // Items inserted by an older parser may still say `unknown`.
        if item.license_kind == LicenseKind::Unknown {
            if let Some(raw) = item.license_raw.as_deref() {
                let kind = parse_license(raw);
                if kind != LicenseKind::Unknown {
                    debug!(
                        item_id = %item.id,
                        license = %kind.as_str(),
                        "license recognized on collect"
                    );
                    patch.license_kind = Some(kind);
                }
            }
        }

        Outcome::Success(patch)
    }
}
