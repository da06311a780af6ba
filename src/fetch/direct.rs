//! Direct HTTP transport
//!
//! One GET per attempt with browser-like headers and a rotating
//! User-Agent. Response charset decoding follows `Content-Type`.

use async_trait::async_trait;
use reqwest::{header::USER_AGENT, Client};
use tracing::debug;

use super::identity::{browser_headers, Identity};
use super::{retrying, FetchSettings, FetchTarget, Fetcher};
use crate::error::TransportError;

pub struct DirectFetcher {
    client: Client,
    settings: FetchSettings,
    identity: Identity,
}

impl DirectFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(browser_headers())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            identity: Identity::new(settings.identity),
            client,
            settings,
        })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    async fn attempt(&self, url: &str) -> Result<String, TransportError> {
        let user_agent = self.identity.user_agent();
        debug!(url = %url, user_agent = %user_agent, "direct fetch");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(TransportError::EmptyBody(url.to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for DirectFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<String, TransportError> {
        retrying(&self.settings, &target.url, || self.attempt(&target.url)).await
    }
}
