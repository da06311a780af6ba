//! Rendered transport: full browser session for script-populated pages

use async_trait::async_trait;
use tracing::debug;

use super::browser::BrowserPool;
use super::identity::Identity;
use super::{retrying, FetchSettings, FetchTarget, Fetcher};
use crate::error::TransportError;

pub struct RenderedFetcher {
    pool: BrowserPool,
    settings: FetchSettings,
    identity: Identity,
}

impl RenderedFetcher {
    pub fn new(settings: FetchSettings, pool: BrowserPool) -> Self {
        Self {
            identity: Identity::new(settings.identity),
            pool,
            settings,
        }
    }

    async fn attempt(&self, target: &FetchTarget) -> Result<String, TransportError> {
        let user_agent = self.identity.user_agent();
        debug!(url = %target.url, user_agent = %user_agent, "rendered fetch");

        let mut session = self.pool.checkout(user_agent).await?;
        let result = session
            .render(&target.url, &target.wait_for, target.settle)
            .await;
        session.release().await;

        let html = result?;
        if html.trim().is_empty() {
            return Err(TransportError::EmptyBody(target.url.clone()));
        }
        Ok(html)
    }
}

#[async_trait]
impl Fetcher for RenderedFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<String, TransportError> {
        retrying(&self.settings, &target.url, || self.attempt(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::browser::testing::FakeDriver;
    use crate::fetch::{IdentityRotation, TransportKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn settings(timeout: Duration) -> FetchSettings {
        FetchSettings {
            transport: TransportKind::Rendered,
            timeout,
            max_retries: 0,
            backoff: Duration::ZERO,
            identity: IdentityRotation::Fixed,
        }
    }

    #[tokio::test]
    async fn renders_through_pool() {
        let pool = BrowserPool::new(Arc::new(FakeDriver::new("<div>۸,۶۶۱,۰۰۰</div>", Duration::ZERO)), 2);
        let fetcher = RenderedFetcher::new(settings(Duration::from_secs(5)), pool.clone());

        let html = fetcher.fetch(&FetchTarget::new("https://goldika.ir/")).await.unwrap();
        assert!(html.contains("۸,۶۶۱,۰۰۰"));
        assert_eq!(pool.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_session() {
        let pool = BrowserPool::new(Arc::new(FakeDriver::new("<p/>", Duration::from_secs(60))), 1);
        let fetcher = RenderedFetcher::new(settings(Duration::from_secs(2)), pool.clone());

        let err = fetcher.fetch(&FetchTarget::new("https://talapp.ir/")).await.unwrap_err();
        assert!(matches!(err, TransportError::TimedOut(_)));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.open_sessions(), 0);
    }

    #[tokio::test]
    async fn disabled_pool_is_transport_failure() {
        let fetcher = RenderedFetcher::new(settings(Duration::from_secs(1)), BrowserPool::disabled());
        let err = fetcher.fetch(&FetchTarget::new("https://melligold.com/")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }
}
