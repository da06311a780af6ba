//! Fetch module - raw content retrieval for source adapters
//!
//! Two interchangeable transports sit behind the `Fetcher` trait:
//! - `DirectFetcher`: a plain HTTP GET (reqwest)
//! - `RenderedFetcher`: a browser session checked out of a `BrowserPool`
//!
//! Both enforce their own per-attempt timeout and share one bounded retry
//! policy (`retrying`), independent of the orchestrator's cycle deadline.

mod browser;
mod direct;
mod identity;
mod rendered;

#[cfg(feature = "browser")]
mod webdriver;

pub use browser::{BrowserPool, RenderDriver, RenderSession, SessionGuard};
pub use direct::DirectFetcher;
pub use identity::{browser_headers, Identity, IdentityRotation, USER_AGENTS};
pub use rendered::RenderedFetcher;

#[cfg(feature = "browser")]
pub use webdriver::WebDriver;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::TransportError;

/// Hard ceiling on retries, whatever the configuration says
pub const MAX_RETRIES: u32 = 2;

/// What an adapter asks a fetcher to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: String,
    /// CSS selector a rendered page must contain before its source is read
    pub wait_for: String,
    /// Extra time for client-side scripts to populate prices
    pub settle: Duration,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait_for: "body".to_string(),
            settle: Duration::ZERO,
        }
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// Transport used for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Direct,
    Rendered,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Rendered => write!(f, "rendered"),
        }
    }
}

/// Per-source transport settings
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub transport: TransportKind,
    /// Per-attempt timeout
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base delay, doubled on each retry
    pub backoff: Duration,
    pub identity: IdentityRotation,
}

impl FetchSettings {
    pub fn direct() -> Self {
        Self {
            transport: TransportKind::Direct,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff: Duration::from_millis(500),
            identity: IdentityRotation::PerRequest,
        }
    }

    pub fn rendered() -> Self {
        Self {
            transport: TransportKind::Rendered,
            timeout: Duration::from_secs(30),
            max_retries: 1,
            backoff: Duration::from_secs(1),
            identity: IdentityRotation::PerRequest,
        }
    }

    pub fn for_transport(transport: TransportKind) -> Self {
        match transport {
            TransportKind::Direct => Self::direct(),
            TransportKind::Rendered => Self::rendered(),
        }
    }

    pub fn retries(&self) -> u32 {
        self.max_retries.min(MAX_RETRIES)
    }

    /// Upper bound on wall-clock time a fetch with these settings can take,
    /// jitter included.
    pub fn slice(&self) -> Duration {
        let attempts = self.retries() + 1;
        let mut total = self.timeout * attempts;
        for attempt in 0..self.retries() {
            total += backoff_delay(self.backoff, attempt) + self.backoff;
        }
        total
    }
}

/// Raw content retrieval, independent of adapter-specific parsing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &FetchTarget) -> Result<String, TransportError>;
}

/// Exponential backoff without jitter: `base * 2^attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(8))
}

fn jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let max_ms = base.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Run `attempt` under the settings' timeout, retrying retryable errors at
/// most `settings.retries()` times with exponential backoff plus jitter.
pub async fn retrying<F, Fut>(
    settings: &FetchSettings,
    url: &str,
    mut attempt: F,
) -> Result<String, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, TransportError>>,
{
    let mut tries = 0u32;
    loop {
        let result = match tokio::time::timeout(settings.timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut(settings.timeout)),
        };

        match result {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && tries < settings.retries() => {
                let delay = backoff_delay(settings.backoff, tries) + jitter(settings.backoff);
                warn!(
                    url = %url,
                    attempt = tries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Dispatches to the transport a source is configured for
pub enum SourceFetcher {
    Direct(DirectFetcher),
    Rendered(RenderedFetcher),
}

impl SourceFetcher {
    pub fn build(settings: FetchSettings, pool: &BrowserPool) -> Result<Self, TransportError> {
        Ok(match settings.transport {
            TransportKind::Direct => SourceFetcher::Direct(DirectFetcher::new(settings)?),
            TransportKind::Rendered => {
                SourceFetcher::Rendered(RenderedFetcher::new(settings, pool.clone()))
            }
        })
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<String, TransportError> {
        match self {
            SourceFetcher::Direct(f) => f.fetch(target).await,
            SourceFetcher::Rendered(f) => f.fetch(target).await,
        }
    }
}
