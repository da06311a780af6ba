//! Collection orchestrator
//!
//! Runs every selected source concurrently and returns exactly one
//! `FetchOutcome` per source:
//! - at most `max_workers` sources run at once (semaphore)
//! - each source gets its own slice timeout once it holds a permit
//! - the cycle deadline bounds the whole collection; sources still pending
//!   when it passes are aborted and reported as `Timeout`
//! - a panicking adapter becomes an `Internal` failure for that source only

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::sources::{RegisteredSource, SourceRegistry};
use crate::error::ConfigError;
use crate::types::{Failure, FailureKind, FetchOutcome, QuoteBounds, SourceId};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Sources running at the same time
    pub max_workers: usize,
    /// Wall-clock bound on a whole collection
    pub deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            deadline: Duration::from_secs(90),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    bounds: QuoteBounds,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<SourceRegistry>, bounds: QuoteBounds, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            bounds,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Collect one outcome per selected source (`None` = all enabled).
    /// An unknown id fails the call before any source runs.
    pub async fn run(&self, selection: Option<&[SourceId]>) -> Result<Vec<FetchOutcome>, ConfigError> {
        let sources = self.registry.resolve(selection)?;
        Ok(run_sources(
            sources,
            &self.bounds,
            self.config.deadline,
            self.config.max_workers,
        )
        .await)
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run one source under its slice timeout, isolated in its own task so a
/// panic cannot take the collection down.
async fn run_one(source: RegisteredSource, bounds: QuoteBounds, slice: Duration) -> FetchOutcome {
    let id = source.id().clone();
    let adapter = source.adapter.clone();
    let fetcher = source.fetcher.clone();

    let task = tokio::spawn(async move { adapter.extract(fetcher.as_ref(), &bounds).await });
    let _guard = AbortOnDrop(task.abort_handle());

    match timeout(slice, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => {
            let payload = e.into_panic();
            let message = panic_message(&*payload);
            Failure::new(id, FailureKind::Internal, format!("adapter panicked: {message}")).into()
        }
        Ok(Err(_)) => Failure::new(id, FailureKind::Internal, "adapter task cancelled").into(),
        Err(_) => Failure::new(
            id,
            FailureKind::Timeout,
            format!("no result within {}ms slice", slice.as_millis()),
        )
        .into(),
    }
}

fn log_outcome(outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Quote(q) => info!(
            source = %q.source_id,
            price = %q.price,
            change_percent = ?q.change_percent.map(|c| c.to_string()),
            "quote collected"
        ),
        FetchOutcome::Failure(f) => warn!(
            source = %f.source_id,
            kind = %f.kind,
            detail = %f.detail,
            "source failed"
        ),
    }
}

/// Run `sources` with bounded concurrency under one deadline. Returns one
/// outcome per source, ordered by source id.
pub async fn run_sources(
    sources: Vec<RegisteredSource>,
    bounds: &QuoteBounds,
    deadline: Duration,
    max_workers: usize,
) -> Vec<FetchOutcome> {
    if sources.is_empty() {
        return Vec::new();
    }

    let started = Instant::now();
    let deadline_at = started + deadline;
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut pending: BTreeSet<SourceId> = BTreeSet::new();
    let mut set = JoinSet::new();

    for source in sources {
        let id = source.id().clone();
        if !pending.insert(id.clone()) {
            debug!(source = %id, "duplicate source skipped");
            continue;
        }

        let permits = permits.clone();
        let bounds = bounds.clone();
        let slice = source.settings.slice().min(deadline);

        set.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let failure = Failure::new(id, FailureKind::Internal, "worker pool closed");
                    return FetchOutcome::from(failure);
                }
            };
            debug!(source = %id, slice_ms = slice.as_millis() as u64, "source started");
            run_one(source, bounds, slice).await
        });
    }

    let expected = pending.len();
    let mut outcomes = Vec::with_capacity(expected);
    let mut deadline_hit = false;

    let cutoff = sleep_until(deadline_at);
    tokio::pin!(cutoff);

    loop {
        tokio::select! {
            biased;

            joined = set.join_next() => match joined {
                Some(Ok(outcome)) => {
                    pending.remove(outcome.source_id());
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                Some(Err(e)) => warn!(error = %e, "source task failed"),
                None => break,
            },
            _ = &mut cutoff => {
                deadline_hit = true;
                warn!(
                    pending = pending.len(),
                    deadline_ms = deadline.as_millis() as u64,
                    "cycle deadline reached, aborting remaining sources"
                );
                set.abort_all();
                break;
            }
        }
    }

    // Tasks that finished in the same instant as the deadline still count.
    if deadline_hit {
        while let Some(joined) = set.join_next().await {
            if let Ok(outcome) = joined {
                pending.remove(outcome.source_id());
                log_outcome(&outcome);
                outcomes.push(outcome);
            }
        }
    }

    for id in pending {
        let failure = if deadline_hit {
            Failure::new(
                id,
                FailureKind::Timeout,
                format!("cycle deadline of {}ms reached", deadline.as_millis()),
            )
        } else {
            Failure::new(id, FailureKind::Internal, "source task ended without a result")
        };
        let outcome = FetchOutcome::from(failure);
        log_outcome(&outcome);
        outcomes.push(outcome);
    }

    outcomes.sort_by(|a, b| a.source_id().cmp(b.source_id()));

    let quotes = outcomes.iter().filter(|o| o.is_quote()).count();
    info!(
        sources = expected,
        quotes,
        failures = expected - quotes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        deadline_hit,
        "collection finished"
    );

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractError, TransportError};
    use crate::fetch::{FetchSettings, FetchTarget, Fetcher, MockFetcher, TransportKind};
    use crate::oracle::sources::SourceAdapter;
    use crate::types::RawQuote;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter whose page body is the price itself
    struct PlainSource {
        id: SourceId,
    }

    #[async_trait]
    impl SourceAdapter for PlainSource {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn target(&self) -> FetchTarget {
            FetchTarget::new(format!("https://{}.test/", self.id))
        }

        fn default_transport(&self) -> TransportKind {
            TransportKind::Direct
        }

        fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
            if html == "panic" {
                panic!("layout changed");
            }
            let price: Decimal = html
                .parse()
                .map_err(|_| ExtractError::NotANumber(html.to_string()))?;
            Ok(RawQuote::new(price, captured_at))
        }
    }

    /// Fetcher that sleeps, then returns a fixed body; tracks concurrency
    struct SlowFetcher {
        body: String,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _target: &FetchTarget) -> Result<String, TransportError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn source(id: &str, fetcher: impl Fetcher + 'static) -> RegisteredSource {
        RegisteredSource {
            adapter: Arc::new(PlainSource { id: id.into() }),
            fetcher: Arc::new(fetcher),
            settings: FetchSettings::direct(),
        }
    }

    fn body(text: &'static str) -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(text.to_string()));
        fetcher
    }

    fn refusing() -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_| {
            Err(TransportError::Browser("unreachable".into()))
        });
        fetcher
    }

    #[tokio::test]
    async fn one_outcome_per_source_even_when_all_fail() {
        let sources = vec![
            source("a", refusing()),
            source("b", body("not a price")),
            source("c", body("1000")),
        ];
        let outcomes = run_sources(sources, &QuoteBounds::default(), Duration::from_secs(5), 2).await;

        let kinds: Vec<_> = outcomes.iter().map(|o| o.failure_kind()).collect();
        assert_eq!(
            kinds,
            vec![
                Some(FailureKind::Transport),
                Some(FailureKind::Parse),
                Some(FailureKind::Validation),
            ]
        );
    }

    #[tokio::test]
    async fn panicking_adapter_is_isolated() {
        let sources = vec![source("boom", body("panic")), source("ok", body("86610000"))];
        let outcomes = run_sources(sources, &QuoteBounds::default(), Duration::from_secs(5), 4).await;

        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            FetchOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Internal);
                assert!(f.detail.contains("layout changed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcomes[1].is_quote());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_stragglers_into_timeouts() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let slow = |delay_secs| SlowFetcher {
            body: "86610000".into(),
            delay: Duration::from_secs(delay_secs),
            active: active.clone(),
            peak: peak.clone(),
        };

        let mut stuck = source("stuck", slow(3600));
        // slice longer than the deadline so the deadline is what fires
        stuck.settings.timeout = Duration::from_secs(3600);
        let sources = vec![source("fast", slow(1)), stuck];

        let started = Instant::now();
        let outcomes = run_sources(sources, &QuoteBounds::default(), Duration::from_secs(20), 4).await;

        assert!(started.elapsed() <= Duration::from_secs(21));
        assert!(outcomes[0].is_quote());
        assert_eq!(outcomes[1].source_id().as_str(), "stuck");
        assert_eq!(outcomes[1].failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn slice_timeout_is_per_source() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut slow = source(
            "slow",
            SlowFetcher {
                body: "86610000".into(),
                delay: Duration::from_secs(600),
                active: active.clone(),
                peak: peak.clone(),
            },
        );
        slow.settings.timeout = Duration::from_secs(2);
        slow.settings.max_retries = 0;

        let outcomes = run_sources(vec![slow], &QuoteBounds::default(), Duration::from_secs(90), 1).await;
        match &outcomes[0] {
            FetchOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Timeout);
                assert!(f.detail.contains("slice"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_max_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sources: Vec<_> = (0..6)
            .map(|i| {
                source(
                    &format!("s{i}"),
                    SlowFetcher {
                        body: "86610000".into(),
                        delay: Duration::from_secs(1),
                        active: active.clone(),
                        peak: peak.clone(),
                    },
                )
            })
            .collect();

        let outcomes = run_sources(sources, &QuoteBounds::default(), Duration::from_secs(60), 2).await;
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.is_quote()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_selection_runs_nothing() {
        let mut registry = SourceRegistry::new();
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().never();
        registry
            .register(
                Arc::new(PlainSource { id: "a".into() }),
                Arc::new(fetcher),
                FetchSettings::direct(),
            )
            .unwrap();

        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            QuoteBounds::default(),
            OrchestratorConfig::default(),
        );
        let selection = vec![SourceId::from("a"), SourceId::from("missing")];
        let err = orchestrator.run(Some(selection.as_slice())).await.unwrap_err();
        assert_eq!(err, ConfigError::UnknownSource(SourceId::from("missing")));

        let empty = orchestrator.run(Some(&[][..])).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn quotes_are_validated_with_configured_bounds() {
        let bounds = QuoteBounds {
            min_price: dec!(50),
            max_price: dec!(500),
            max_daily_change: dec!(50),
        };
        let outcomes = run_sources(
            vec![source("a", body("100")), source("b", body("1000"))],
            &bounds,
            Duration::from_secs(5),
            4,
        )
        .await;
        assert!(outcomes[0].is_quote());
        assert_eq!(outcomes[1].failure_kind(), Some(FailureKind::Validation));
    }
}
