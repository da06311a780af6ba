//! Gold price sources (milli, talasea, goldika, melli, talapp, digikala)
//!
//! Each source is a `SourceAdapter`: where to fetch, and how to turn the
//! fetched page into a `RawQuote`. Shared parsing lives in `extract`.

pub mod extract;

mod digikala;
mod goldika;
mod melli;
mod milli;
mod talapp;
mod talasea;

pub use digikala::DigikalaSource;
pub use goldika::GoldikaSource;
pub use melli::MelliSource;
pub use milli::MilliSource;
pub use talapp::TalappSource;
pub use talasea::TalaseaSource;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{ConfigError, ExtractError};
use crate::fetch::{BrowserPool, FetchSettings, FetchTarget, Fetcher, SourceFetcher, TransportKind};
use crate::types::{Failure, FailureKind, FetchOutcome, QuoteBounds, RawQuote, SourceId};

/// A single gold price source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &SourceId;

    /// Page to fetch
    fn target(&self) -> FetchTarget;

    /// Transport used unless configuration says otherwise
    fn default_transport(&self) -> TransportKind;

    /// Locate the price in fetched content and convert it to Rial per gram
    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError>;

    /// Fetch, parse and validate. Never fails: every error becomes a
    /// `Failure` for this source.
    async fn extract(&self, fetcher: &dyn Fetcher, bounds: &QuoteBounds) -> FetchOutcome {
        let id = self.id().clone();

        let html = match fetcher.fetch(&self.target()).await {
            Ok(html) => html,
            Err(e) => return Failure::new(id, FailureKind::Transport, e.to_string()).into(),
        };

        let raw = match self.parse(&html, Utc::now()) {
            Ok(raw) => raw,
            Err(e) => return Failure::new(id, FailureKind::Parse, e.to_string()).into(),
        };

        match bounds.validate(&id, raw) {
            Ok(quote) => quote.into(),
            Err(e) => Failure::new(id, FailureKind::Validation, e.to_string()).into(),
        }
    }
}

/// Every adapter this build knows about; `bounds` feeds adapters that
/// filter candidate amounts by plausibility.
pub fn builtin_adapters(bounds: &QuoteBounds) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(MilliSource::new()),
        Arc::new(TalaseaSource::with_bounds(bounds.clone())),
        Arc::new(GoldikaSource::new()),
        Arc::new(MelliSource::new()),
        Arc::new(TalappSource::new()),
        Arc::new(DigikalaSource::new()),
    ]
}

/// An adapter together with the fetcher and settings it runs with
#[derive(Clone)]
pub struct RegisteredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub fetcher: Arc<dyn Fetcher>,
    pub settings: FetchSettings,
}

impl RegisteredSource {
    pub fn id(&self) -> &SourceId {
        self.adapter.id()
    }
}

/// Sources available to the orchestrator, ordered by id
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, RegisteredSource>,
    disabled: BTreeSet<SourceId>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        fetcher: Arc<dyn Fetcher>,
        settings: FetchSettings,
    ) -> Result<(), ConfigError> {
        let id = adapter.id().clone();
        if self.sources.contains_key(&id) || self.disabled.contains(&id) {
            return Err(ConfigError::DuplicateSource(id));
        }
        self.sources.insert(
            id,
            RegisteredSource {
                adapter,
                fetcher,
                settings,
            },
        );
        Ok(())
    }

    /// Record a known source that is switched off
    pub fn register_disabled(&mut self, id: SourceId) -> Result<(), ConfigError> {
        if self.sources.contains_key(&id) || !self.disabled.insert(id.clone()) {
            return Err(ConfigError::DuplicateSource(id));
        }
        Ok(())
    }

    pub fn get(&self, id: &SourceId) -> Option<&RegisteredSource> {
        self.sources.get(id)
    }

    /// Enabled source ids in order
    pub fn ids(&self) -> Vec<SourceId> {
        self.sources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolve a selection into the sources to run. `None` selects every
    /// enabled source. Any unknown or disabled id rejects the whole
    /// selection; repeated ids run once.
    pub fn resolve(&self, selection: Option<&[SourceId]>) -> Result<Vec<RegisteredSource>, ConfigError> {
        let Some(ids) = selection else {
            return Ok(self.sources.values().cloned().collect());
        };

        let mut seen = BTreeSet::new();
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            if self.disabled.contains(id) {
                return Err(ConfigError::invalid(
                    "run.sources",
                    format!("source {id} is disabled"),
                ));
            }
            let source = self
                .sources
                .get(id)
                .ok_or_else(|| ConfigError::UnknownSource(id.clone()))?;
            if seen.insert(id.clone()) {
                resolved.push(source.clone());
            }
        }
        Ok(resolved)
    }

    /// Build the registry from configuration: built-in adapters, each with
    /// a fetcher for its configured transport.
    pub fn from_config(config: &AppConfig, pool: &BrowserPool) -> Result<Self> {
        let adapters = builtin_adapters(&config.bounds());

        let known: BTreeSet<&str> = adapters.iter().map(|a| a.id().as_str()).collect();
        for key in config.sources.keys() {
            if !known.contains(key.as_str()) {
                return Err(ConfigError::UnknownSource(SourceId::new(key.clone())).into());
            }
        }

        let mut registry = Self::new();
        for adapter in adapters {
            let id = adapter.id().clone();
            if !config.source_enabled(&id) {
                debug!(source = %id, "source disabled");
                registry.register_disabled(id)?;
                continue;
            }

            let settings = config.fetch_settings(&id, adapter.default_transport());
            let fetcher = SourceFetcher::build(settings.clone(), pool)
                .with_context(|| format!("Failed to build fetcher for {id}"))?;
            debug!(
                source = %id,
                transport = %settings.transport,
                timeout_ms = settings.timeout.as_millis() as u64,
                retries = settings.retries(),
                "source registered"
            );
            registry.register(adapter, Arc::new(fetcher), settings)?;
        }

        info!(
            enabled = registry.len(),
            disabled = registry.disabled.len(),
            "source registry built"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use crate::error::TransportError;
    use crate::types::Quote;
    use rust_decimal_macros::dec;

    const MILLI_PAGE: &str = r#"<html><body>
        <div class="price-box"><span>قیمت ۱ گرم طلای ۱۸ عیار</span><span>۸۶,۶۱۰,۰۰۰ ریال</span></div>
        <div><span>تغییرات</span><span class="text-green">۱.۴۷%</span></div>
    </body></html>"#;

    fn fetcher_returning(body: &'static str) -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(move |_| Ok(body.to_string()));
        fetcher
    }

    #[tokio::test]
    async fn extract_produces_quote() {
        let adapter = MilliSource::new();
        let fetcher = fetcher_returning(MILLI_PAGE);

        let outcome = adapter.extract(&fetcher, &QuoteBounds::default()).await;
        let FetchOutcome::Quote(Quote { price, change_percent, source_id, .. }) = outcome else {
            panic!("expected a quote, got {outcome:?}");
        };
        assert_eq!(source_id.as_str(), "milli");
        assert_eq!(price, dec!(86610000));
        assert_eq!(change_percent, Some(dec!(1.47)));
    }

    #[tokio::test]
    async fn transport_error_becomes_transport_failure() {
        let adapter = MilliSource::new();
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(1).returning(|target| {
            Err(TransportError::Status {
                status: 403,
                url: target.url.clone(),
            })
        });

        let outcome = adapter.extract(&fetcher, &QuoteBounds::default()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transport));
    }

    #[tokio::test]
    async fn garbage_becomes_parse_failure() {
        let adapter = MilliSource::new();
        let fetcher = fetcher_returning("<html><body><p>سایت در حال بروزرسانی است</p></body></html>");

        let outcome = adapter.extract(&fetcher, &QuoteBounds::default()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Parse));
    }

    #[tokio::test]
    async fn implausible_price_becomes_validation_failure() {
        let adapter = MilliSource::new();
        let fetcher = fetcher_returning(
            r#"<div><span>قیمت ۱ گرم طلای ۱۸ عیار</span><span>8,661,000 ریال</span></div>"#,
        );

        let outcome = adapter.extract(&fetcher, &QuoteBounds::default()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Validation));
    }

    fn registry_of(ids: &[&'static str]) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        for id in ids {
            registry
                .register(
                    Arc::new(MilliSource::with_id(*id)),
                    Arc::new(MockFetcher::new()),
                    FetchSettings::direct(),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn resolve_rejects_unknown_ids() {
        let registry = registry_of(&["a", "b"]);
        let selection = vec![SourceId::from("a"), SourceId::from("zzz")];
        let err = registry.resolve(Some(selection.as_slice())).err().unwrap();
        assert_eq!(err, ConfigError::UnknownSource(SourceId::from("zzz")));
    }

    #[test]
    fn resolve_dedupes_and_keeps_order() {
        let registry = registry_of(&["a", "b", "c"]);
        let selection = vec![SourceId::from("c"), SourceId::from("a"), SourceId::from("c")];
        let ids: Vec<_> = registry
            .resolve(Some(selection.as_slice()))
            .unwrap()
            .iter()
            .map(|s| s.id().clone())
            .collect();
        assert_eq!(ids, vec![SourceId::from("c"), SourceId::from("a")]);

        assert_eq!(registry.resolve(None).unwrap().len(), 3);
        assert!(registry.resolve(Some(&[][..])).unwrap().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_of(&["a"]);
        let err = registry
            .register(
                Arc::new(MilliSource::with_id("a")),
                Arc::new(MockFetcher::new()),
                FetchSettings::direct(),
            )
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateSource(SourceId::from("a")));
    }

    #[tokio::test]
    async fn from_config_skips_disabled_and_rejects_unknown_overrides() {
        let mut config = AppConfig::defaults().unwrap();
        config.sources.insert(
            "digikala".into(),
            crate::config::SourceOverride {
                enabled: false,
                ..Default::default()
            },
        );

        let registry = SourceRegistry::from_config(&config, &BrowserPool::disabled()).unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.get(&SourceId::from("digikala")).is_none());
        assert_eq!(
            registry.get(&SourceId::from("goldika")).unwrap().settings.transport,
            TransportKind::Rendered
        );
        let selection = vec![SourceId::from("digikala")];
        assert!(matches!(
            registry.resolve(Some(selection.as_slice())),
            Err(ConfigError::InvalidSetting { .. })
        ));

        config.sources.insert("tgju".into(), Default::default());
        let err = SourceRegistry::from_config(&config, &BrowserPool::disabled())
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown source id: tgju"));
    }
}
