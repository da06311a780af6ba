//! Configuration management for GoldArb
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::arbitrage::AnalyzerConfig;
use crate::error::ConfigError;
use crate::fetch::{FetchSettings, IdentityRotation, TransportKind, MAX_RETRIES};
use crate::oracle::OrchestratorConfig;
use crate::types::{QuoteBounds, SourceId};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub run: RunConfig,
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorSection,
    pub validation: ValidationConfig,
    pub analysis: AnalysisConfig,
    pub fetch: FetchConfig,
    pub browser: BrowserConfig,
    pub persistence: PersistenceConfig,
    /// Per-source overrides keyed by source id
    #[serde(default)]
    pub sources: HashMap<String, SourceOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Seconds between cycles when looping
    pub interval_secs: u64,
    /// Run a single cycle and exit
    pub once: bool,
    /// Minimum quotes a cycle must produce (checked in `once` mode)
    pub min_quotes: usize,
    /// Sources to run; empty means every enabled source
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    pub max_workers: usize,
    /// Cycle deadline in seconds
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Lowest plausible price, Rial per gram
    pub min_price: Decimal,
    /// Highest plausible price, Rial per gram
    pub max_price: Decimal,
    /// Largest plausible daily change, percent (absolute)
    pub max_daily_change: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Spreads must be strictly above this percentage
    pub threshold_percent: Decimal,
    /// Quotes older than this are discarded
    pub max_quote_age_secs: u64,
    /// Opportunities shown by text and log summaries
    pub top_n: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Per-attempt timeout for direct fetches
    pub timeout_secs: u64,
    /// Per-attempt timeout for rendered fetches
    pub rendered_timeout_secs: u64,
    pub max_retries: u32,
    pub rendered_max_retries: u32,
    /// Base retry backoff in milliseconds
    pub backoff_ms: u64,
    pub identity: IdentityRotation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver endpoint (chromedriver)
    pub webdriver_url: String,
    /// Maximum concurrent browser sessions
    pub pool_size: usize,
    pub headless: bool,
    /// How long to wait for the page body, in seconds
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Results directory
    pub results_dir: String,
    /// Write one pretty JSON report per cycle
    pub json_enabled: bool,
    /// Append quotes, opportunities and failures to CSV
    pub csv_enabled: bool,
}

/// Per-source settings; unset fields fall back to the `fetch` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceOverride {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub transport: Option<TransportKind>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub identity: Option<IdentityRotation>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for SourceOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            transport: None,
            timeout_secs: None,
            max_retries: None,
            identity: None,
        }
    }
}

impl AppConfig {
    /// Built-in defaults, before files and environment.
    fn defaults_builder() -> Result<ConfigBuilder<DefaultState>> {
        let empty: Vec<String> = Vec::new();
        let builder = Config::builder()
            // Run defaults
            .set_default("run.interval_secs", 300)?
            .set_default("run.once", false)?
            .set_default("run.min_quotes", 2)?
            .set_default("run.sources", empty)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Orchestrator defaults
            .set_default("orchestrator.max_workers", 4)?
            .set_default("orchestrator.deadline_secs", 90)?
            // Validation defaults (Rial per gram)
            .set_default("validation.min_price", "50000000")?
            .set_default("validation.max_price", "200000000")?
            .set_default("validation.max_daily_change", "50")?
            // Analysis defaults
            .set_default("analysis.threshold_percent", "1")?
            .set_default("analysis.max_quote_age_secs", 600)?
            .set_default("analysis.top_n", 5)?
            // Fetch defaults
            .set_default("fetch.timeout_secs", 10)?
            .set_default("fetch.rendered_timeout_secs", 30)?
            .set_default("fetch.max_retries", 2)?
            .set_default("fetch.rendered_max_retries", 1)?
            .set_default("fetch.backoff_ms", 500)?
            .set_default("fetch.identity", "per_request")?
            // Browser defaults
            .set_default("browser.webdriver_url", "http://localhost:9515")?
            .set_default("browser.pool_size", 2)?
            .set_default("browser.headless", true)?
            .set_default("browser.wait_secs", 10)?
            // Persistence defaults
            .set_default("persistence.results_dir", "./results")?
            .set_default("persistence.json_enabled", true)?
            .set_default("persistence.csv_enabled", true)?;
        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults_builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (GOLDARB__*)
            .add_source(
                Environment::with_prefix("GOLDARB")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("run.sources"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Built-in defaults only; no files, no environment.
    pub fn defaults() -> Result<Self> {
        Self::defaults_builder()?
            .build()
            .context("Failed to build default configuration")?
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    /// Reject nonsensical values before anything runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_workers == 0 {
            return Err(ConfigError::invalid("orchestrator.max_workers", "must be at least 1"));
        }
        if self.orchestrator.deadline_secs == 0 {
            return Err(ConfigError::invalid("orchestrator.deadline_secs", "must be positive"));
        }
        if self.validation.min_price <= Decimal::ZERO {
            return Err(ConfigError::invalid("validation.min_price", "must be positive"));
        }
        if self.validation.min_price >= self.validation.max_price {
            return Err(ConfigError::invalid(
                "validation.min_price",
                format!(
                    "{} is not below max_price {}",
                    self.validation.min_price, self.validation.max_price
                ),
            ));
        }
        if self.validation.max_daily_change < Decimal::ZERO {
            return Err(ConfigError::invalid("validation.max_daily_change", "must not be negative"));
        }
        if self.analysis.threshold_percent < Decimal::ZERO {
            return Err(ConfigError::invalid("analysis.threshold_percent", "must not be negative"));
        }
        if self.browser.pool_size == 0 {
            return Err(ConfigError::invalid("browser.pool_size", "must be at least 1"));
        }

        let retries = std::iter::once(("fetch.max_retries".to_string(), self.fetch.max_retries))
            .chain(std::iter::once((
                "fetch.rendered_max_retries".to_string(),
                self.fetch.rendered_max_retries,
            )))
            .chain(self.sources.iter().filter_map(|(id, o)| {
                o.max_retries.map(|r| (format!("sources.{id}.max_retries"), r))
            }));
        for (key, value) in retries {
            if value > MAX_RETRIES {
                return Err(ConfigError::invalid(
                    key,
                    format!("{value} exceeds the limit of {MAX_RETRIES}"),
                ));
            }
        }

        Ok(())
    }

    pub fn bounds(&self) -> QuoteBounds {
        QuoteBounds {
            min_price: self.validation.min_price,
            max_price: self.validation.max_price,
            max_daily_change: self.validation.max_daily_change,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_workers: self.orchestrator.max_workers,
            deadline: Duration::from_secs(self.orchestrator.deadline_secs),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            threshold_percent: self.analysis.threshold_percent,
            max_quote_age: Duration::from_secs(self.analysis.max_quote_age_secs),
        }
    }

    /// Explicit source selection, or `None` for every enabled source
    pub fn selection(&self) -> Option<Vec<SourceId>> {
        if self.run.sources.is_empty() {
            None
        } else {
            Some(self.run.sources.iter().map(|s| SourceId::new(s.trim())).collect())
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        PathBuf::from(&self.persistence.results_dir)
    }

    /// Transport settings for one source: transport defaults first, then
    /// the source's own overrides.
    pub fn fetch_settings(&self, id: &SourceId, default_transport: TransportKind) -> FetchSettings {
        let overrides = self.sources.get(id.as_str()).cloned().unwrap_or_default();
        let transport = overrides.transport.unwrap_or(default_transport);

        let (timeout_secs, max_retries) = match transport {
            TransportKind::Direct => (self.fetch.timeout_secs, self.fetch.max_retries),
            TransportKind::Rendered => {
                (self.fetch.rendered_timeout_secs, self.fetch.rendered_max_retries)
            }
        };

        FetchSettings {
            transport,
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(timeout_secs)),
            max_retries: overrides.max_retries.unwrap_or(max_retries),
            backoff: Duration::from_millis(self.fetch.backoff_ms),
            identity: overrides.identity.unwrap_or(self.fetch.identity),
        }
    }

    pub fn source_enabled(&self, id: &SourceId) -> bool {
        self.sources.get(id.as_str()).map_or(true, |o| o.enabled)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "workers={} deadline={}s threshold={}% bounds=[{}, {}] interval={}s once={} sources={:?}",
            self.orchestrator.max_workers,
            self.orchestrator.deadline_secs,
            self.analysis.threshold_percent,
            self.validation.min_price,
            self.validation.max_price,
            self.run.interval_secs,
            self.run.once,
            self.run.sources,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_deserialize_and_validate() {
        let config = AppConfig::defaults().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.max_workers, 4);
        assert_eq!(config.bounds(), QuoteBounds::default());
        assert_eq!(config.analysis.threshold_percent, dec!(1));
        assert!(config.selection().is_none());
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut config = AppConfig::defaults().unwrap();
        config.validation.min_price = dec!(200000000);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "validation.min_price"));
    }

    #[test]
    fn validate_rejects_zero_workers_and_excess_retries() {
        let mut config = AppConfig::defaults().unwrap();
        config.orchestrator.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::defaults().unwrap();
        config.sources.insert(
            "melli".into(),
            SourceOverride {
                max_retries: Some(5),
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sources.melli.max_retries"));
    }

    #[test]
    fn source_overrides_apply_on_top_of_transport_defaults() {
        let mut config = AppConfig::defaults().unwrap();
        config.sources.insert(
            "goldika".into(),
            SourceOverride {
                enabled: false,
                transport: Some(TransportKind::Direct),
                timeout_secs: Some(3),
                ..Default::default()
            },
        );

        let id = SourceId::from("goldika");
        let settings = config.fetch_settings(&id, TransportKind::Rendered);
        assert_eq!(settings.transport, TransportKind::Direct);
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.max_retries, 2);
        assert!(!config.source_enabled(&id));

        let other = config.fetch_settings(&SourceId::from("talapp"), TransportKind::Rendered);
        assert_eq!(other.timeout, Duration::from_secs(30));
        assert_eq!(other.max_retries, 1);
        assert!(config.source_enabled(&SourceId::from("talapp")));
    }
}
