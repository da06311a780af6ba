//! Results persistence
//!
//! One pretty JSON file per cycle plus append-only CSV tables of quotes,
//! opportunities and failures for later analysis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::report::{Report, ResultSink};
use crate::types::{FailureKind, SourceId};

const QUOTES_FILE: &str = "quotes.csv";
const OPPORTUNITIES_FILE: &str = "opportunities.csv";
const FAILURES_FILE: &str = "failures.csv";

/// Quote row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub source_id: SourceId,
    pub price: Decimal,
    pub change_absolute: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}

/// Opportunity row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityRecord {
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub rank: usize,
    pub buy_source: SourceId,
    pub sell_source: SourceId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub absolute_spread: Decimal,
    pub percent_spread: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub source_id: SourceId,
    pub kind: FailureKind,
    pub detail: String,
}

/// Writes reports into a results directory
pub struct FileSink {
    dir: PathBuf,
    json_enabled: bool,
    csv_enabled: bool,
    // Serializes appends when cycles overlap
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, json_enabled: bool, csv_enabled: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

        Ok(Self {
            dir,
            json_enabled,
            csv_enabled,
            write_lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        Self::new(&config.results_dir, config.json_enabled, config.csv_enabled)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `arbitrage_results_<YYYYmmdd_HHMMSS>_<cycle>.json`, where `<cycle>`
    /// is the first 8 hex digits of the cycle id
    pub fn json_path(&self, report: &Report) -> PathBuf {
        let cycle = report.cycle_id.simple().to_string();
        self.dir.join(format!(
            "arbitrage_results_{}_{}.json",
            report.generated_at.format("%Y%m%d_%H%M%S"),
            &cycle[..8]
        ))
    }

    fn write_json(&self, report: &Report) -> Result<PathBuf> {
        let path = self.json_path(report);
        let body = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn append_csv(&self, report: &Report) -> Result<()> {
        let mut quotes = Self::create_writer(&self.dir.join(QUOTES_FILE))?;
        for quote in &report.quotes {
            quotes
                .serialize(QuoteRecord {
                    cycle_id: report.cycle_id,
                    generated_at: report.generated_at,
                    source_id: quote.source_id.clone(),
                    price: quote.price,
                    change_absolute: quote.change_absolute,
                    change_percent: quote.change_percent,
                    captured_at: quote.captured_at,
                })
                .context("Failed to write quote record")?;
        }
        quotes.flush().context("Failed to flush quote writer")?;

        let mut opportunities = Self::create_writer(&self.dir.join(OPPORTUNITIES_FILE))?;
        for (i, opp) in report.opportunities.iter().enumerate() {
            opportunities
                .serialize(OpportunityRecord {
                    cycle_id: report.cycle_id,
                    generated_at: report.generated_at,
                    rank: i + 1,
                    buy_source: opp.buy_source.clone(),
                    sell_source: opp.sell_source.clone(),
                    buy_price: opp.buy_price,
                    sell_price: opp.sell_price,
                    absolute_spread: opp.absolute_spread,
                    percent_spread: opp.percent_spread,
                })
                .context("Failed to write opportunity record")?;
        }
        opportunities
            .flush()
            .context("Failed to flush opportunity writer")?;

        let mut failures = Self::create_writer(&self.dir.join(FAILURES_FILE))?;
        for failure in &report.failures {
            failures
                .serialize(FailureRecord {
                    cycle_id: report.cycle_id,
                    generated_at: report.generated_at,
                    source_id: failure.source_id.clone(),
                    kind: failure.kind,
                    detail: failure.detail.clone(),
                })
                .context("Failed to write failure record")?;
        }
        failures.flush().context("Failed to flush failure writer")?;

        Ok(())
    }

    /// Append-mode writer; headers only when the file is new or empty
    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }
}

#[async_trait]
impl ResultSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn publish(&self, report: &Report) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.json_enabled {
            let path = self.write_json(report)?;
            info!(path = %path.display(), "report saved");
        }
        if self.csv_enabled {
            self.append_csv(report)?;
        }
        Ok(())
    }
}
