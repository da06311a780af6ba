//! WebDriver backend for the browser pool (chromedriver or compatible)
//!
//! Compiled with the `browser` feature.

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::browser::{RenderDriver, RenderSession};
use crate::error::TransportError;

pub struct WebDriver {
    url: String,
    headless: bool,
    wait_timeout: Duration,
}

impl WebDriver {
    pub fn new(url: impl Into<String>, headless: bool, wait_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headless,
            wait_timeout,
        }
    }

    fn capabilities(&self, user_agent: &str) -> Map<String, Value> {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-extensions".to_string(),
            "--blink-settings=imagesEnabled=false".to_string(),
            "--window-size=1920,1080".to_string(),
            format!("--user-agent={}", user_agent),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }

        let mut caps = Map::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps
    }
}

fn browser_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Browser(e.to_string())
}

#[async_trait]
impl RenderDriver for WebDriver {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn RenderSession>, TransportError> {
        let client = ClientBuilder::native()
            .capabilities(self.capabilities(user_agent))
            .connect(&self.url)
            .await
            .map_err(browser_err)?;

        Ok(Box::new(WebDriverSession {
            client,
            wait_timeout: self.wait_timeout,
        }))
    }
}

struct WebDriverSession {
    client: Client,
    wait_timeout: Duration,
}

#[async_trait]
impl RenderSession for WebDriverSession {
    async fn render(
        &mut self,
        url: &str,
        wait_for: &str,
        settle: Duration,
    ) -> Result<String, TransportError> {
        self.client.goto(url).await.map_err(browser_err)?;
        self.client
            .wait()
            .at_most(self.wait_timeout)
            .for_element(Locator::Css(wait_for))
            .await
            .map_err(browser_err)?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        self.client.source().await.map_err(browser_err)
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        let session = *self;
        session.client.close().await.map_err(browser_err)
    }
}
