//! Cycle report and the sinks that consume it

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tracing::info;
use uuid::Uuid;

use crate::types::{ArbitrageOpportunity, Failure, FailureKind, Quote, SourceId};

/// A price attributed to its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub source_id: SourceId,
    pub price: Decimal,
}

/// Min/max over a cycle's quotes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub lowest: PricePoint,
    pub highest: PricePoint,
    pub range: Decimal,
    /// `range / lowest * 100`
    pub range_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityStats {
    pub count: usize,
    pub best_percent: Decimal,
    pub lowest_percent: Decimal,
    pub average_percent: Decimal,
    /// Opportunity with the largest Rial spread per gram
    pub best_absolute: ArbitrageOpportunity,
    /// Sum of every opportunity's Rial spread per gram
    pub total_absolute: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketEfficiency {
    /// Volatility below 0.5%
    HighlyEfficient,
    /// Volatility below 1%
    Moderate,
    Volatile,
}

impl fmt::Display for MarketEfficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketEfficiency::HighlyEfficient => write!(f, "highly efficient"),
            MarketEfficiency::Moderate => write!(f, "moderately efficient"),
            MarketEfficiency::Volatile => write!(f, "volatile"),
        }
    }
}

/// Dispersion of prices across sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    pub average_price: Decimal,
    /// Population standard deviation
    pub std_dev: Decimal,
    /// `std_dev / average_price * 100`
    pub volatility_percent: Decimal,
    pub efficiency: MarketEfficiency,
}

/// Output of one analysis cycle. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub threshold_percent: Decimal,
    /// Validated quotes, lowest price first
    pub quotes: Vec<Quote>,
    pub failures: Vec<Failure>,
    /// Ranked, best first
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub summary: Option<PriceSummary>,
    pub opportunity_stats: Option<OpportunityStats>,
    pub market: Option<MarketStats>,
}

impl Report {
    pub fn quote_count(&self) -> usize {
        self.quotes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn failures_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn top(&self, n: usize) -> &[ArbitrageOpportunity] {
        &self.opportunities[..n.min(self.opportunities.len())]
    }
}

/// Receives each finished report (file export, notifications, ...)
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, report: &Report) -> Result<()>;
}

/// Writes a structured summary of each report to the log
pub struct LogSink {
    top_n: usize,
}

impl LogSink {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

#[async_trait]
impl ResultSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, report: &Report) -> Result<()> {
        info!(
            cycle_id = %report.cycle_id,
            quotes = report.quote_count(),
            failures = report.failure_count(),
            opportunities = report.opportunities.len(),
            "cycle report"
        );

        for quote in &report.quotes {
            info!(source = %quote.source_id, price = %format_thousands(quote.price), "price");
        }
        for (kind, count) in report.failures_by_kind() {
            info!(kind = %kind, count, "failures");
        }
        if let Some(summary) = &report.summary {
            info!(
                lowest = %summary.lowest.source_id,
                highest = %summary.highest.source_id,
                range = %format_thousands(summary.range),
                range_percent = %round_percent(summary.range_percent),
                "price range"
            );
        }
        for (rank, opp) in report.top(self.top_n).iter().enumerate() {
            info!(
                rank = rank + 1,
                buy = %opp.buy_source,
                sell = %opp.sell_source,
                spread = %format_thousands(opp.absolute_spread),
                spread_percent = %round_percent(opp.percent_spread),
                "opportunity"
            );
        }
        if let Some(market) = &report.market {
            info!(
                average = %format_thousands(market.average_price),
                volatility_percent = %round_percent(market.volatility_percent),
                efficiency = %market.efficiency,
                "market"
            );
        }
        Ok(())
    }
}

/// Percent for display: 2 decimal places, half away from zero
pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whole Rial with thousands separators, e.g. `86,610,000`
pub fn format_thousands(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().to_string();

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Plain-text rendering of a report for notification channels
pub fn render_text(report: &Report, top_n: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "GOLD PRICE REPORT {}", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "{}", "=".repeat(48));

    if report.quotes.is_empty() {
        let _ = writeln!(out, "No prices available");
    } else {
        let _ = writeln!(out, "Prices (lowest to highest), Rial per gram:");
        for quote in &report.quotes {
            let _ = write!(out, "  {:<12} {:>14}", quote.source_id.as_str(), format_thousands(quote.price));
            if let Some(change) = quote.change_percent {
                let _ = write!(out, "  ({:+}%)", round_percent(change));
            }
            out.push('\n');
        }
    }

    if let Some(summary) = &report.summary {
        if report.quotes.len() > 1 {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Lowest:  {} ({})",
                format_thousands(summary.lowest.price),
                summary.lowest.source_id
            );
            let _ = writeln!(
                out,
                "Highest: {} ({})",
                format_thousands(summary.highest.price),
                summary.highest.source_id
            );
            let _ = writeln!(
                out,
                "Range:   {} ({}%)",
                format_thousands(summary.range),
                round_percent(summary.range_percent)
            );
        }
    }

    let _ = writeln!(out);
    if report.opportunities.is_empty() {
        let _ = writeln!(
            out,
            "No opportunities above {}%",
            report.threshold_percent.normalize()
        );
    } else {
        let _ = writeln!(out, "Opportunities above {}%:", report.threshold_percent.normalize());
        for (rank, opp) in report.top(top_n).iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. buy {} @ {} -> sell {} @ {}: +{} ({}%)",
                rank + 1,
                opp.buy_source,
                format_thousands(opp.buy_price),
                opp.sell_source,
                format_thousands(opp.sell_price),
                format_thousands(opp.absolute_spread),
                round_percent(opp.percent_spread)
            );
        }
        if let Some(stats) = &report.opportunity_stats {
            let _ = writeln!(
                out,
                "Best {}%, average {}%, lowest {}%; best spread {} ({} -> {})",
                round_percent(stats.best_percent),
                round_percent(stats.average_percent),
                round_percent(stats.lowest_percent),
                format_thousands(stats.best_absolute.absolute_spread),
                stats.best_absolute.buy_source,
                stats.best_absolute.sell_source
            );
        }
    }

    if let Some(market) = &report.market {
        let _ = writeln!(
            out,
            "Market: average {}, volatility {}%, {}",
            format_thousands(market.average_price),
            round_percent(market.volatility_percent),
            market.efficiency
        );
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Unavailable sources:");
        for failure in &report.failures {
            let _ = writeln!(out, "  {:<12} {}: {}", failure.source_id.as_str(), failure.kind, failure.detail);
        }
    }

    out
}
