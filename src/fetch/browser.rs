//! Browser session pool for the rendered transport
//!
//! The pool is an explicit value handed to every rendered fetcher; there is
//! no process-wide driver. A semaphore bounds concurrent sessions. Sessions
//! are opened on checkout and closed on release, so none outlives the fetch
//! that opened it. A `SessionGuard` dropped without `release` (timeout,
//! cancellation) closes its session in the background.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Longest wait for a session to close before its pool slot is reclaimed
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One live browser session
#[async_trait]
pub trait RenderSession: Send {
    /// Navigate, wait for `wait_for` to exist, let scripts settle, return
    /// the page source.
    async fn render(
        &mut self,
        url: &str,
        wait_for: &str,
        settle: Duration,
    ) -> Result<String, TransportError>;

    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// Opens browser sessions
#[async_trait]
pub trait RenderDriver: Send + Sync {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn RenderSession>, TransportError>;
}

#[derive(Clone)]
pub struct BrowserPool {
    driver: Option<Arc<dyn RenderDriver>>,
    permits: Arc<Semaphore>,
    open_sessions: Arc<AtomicUsize>,
}

impl BrowserPool {
    pub fn new(driver: Arc<dyn RenderDriver>, max_sessions: usize) -> Self {
        Self {
            driver: Some(driver),
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A pool without a driver; every checkout fails.
    pub fn disabled() -> Self {
        Self {
            driver: None,
            permits: Arc::new(Semaphore::new(1)),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.driver.is_some()
    }

    /// Sessions currently open (checked out or still closing)
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub async fn checkout(&self, user_agent: &str) -> Result<SessionGuard, TransportError> {
        let driver = self.driver.as_ref().ok_or_else(|| {
            TransportError::Unavailable("no browser driver configured".to_string())
        })?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TransportError::Browser(e.to_string()))?;

        let session = driver.open(user_agent).await?;
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        debug!(open = self.open_sessions(), "browser session checked out");

        Ok(SessionGuard {
            session: Some(session),
            permit: Some(permit),
            open_sessions: self.open_sessions.clone(),
        })
    }
}

/// Scoped ownership of one session; the permit returns to the pool only
/// once the session is closed.
pub struct SessionGuard {
    session: Option<Box<dyn RenderSession>>,
    permit: Option<OwnedSemaphorePermit>,
    open_sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    pub async fn render(
        &mut self,
        url: &str,
        wait_for: &str,
        settle: Duration,
    ) -> Result<String, TransportError> {
        match self.session.as_mut() {
            Some(session) => session.render(url, wait_for, settle).await,
            None => Err(TransportError::Browser("session already released".to_string())),
        }
    }

    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session, self.open_sessions.clone(), self.permit.take()).await;
        }
        self.permit.take();
    }
}

/// Close `session` within `CLOSE_TIMEOUT`; the slot is freed either way.
async fn close_session(
    session: Box<dyn RenderSession>,
    open_sessions: Arc<AtomicUsize>,
    permit: Option<OwnedSemaphorePermit>,
) {
    match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to close browser session"),
        Err(_) => warn!(
            timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
            "browser session close timed out, reclaiming slot"
        ),
    }
    open_sessions.fetch_sub(1, Ordering::SeqCst);
    drop(permit);
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        let open_sessions = self.open_sessions.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_session(session, open_sessions, permit));
            }
            Err(_) => {
                warn!("no runtime to close abandoned browser session");
                open_sessions.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
