//! Arbitrage analysis
//!
//! Turns one cycle's fetch outcomes into a [`Report`]: re-validates quotes,
//! attributes min/max, and ranks every buy-low/sell-high pair whose spread
//! clears the threshold.

pub mod stats;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::report::Report;
use crate::types::{
    ArbitrageOpportunity, Failure, FailureKind, FetchOutcome, Quote, QuoteBounds,
};

pub use stats::{market_stats, opportunity_stats, price_summary};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Minimum percent spread, exclusive
    pub threshold_percent: Decimal,
    /// Quotes captured longer ago than this are rejected as stale
    pub max_quote_age: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            threshold_percent: dec!(1),
            max_quote_age: Duration::from_secs(600),
        }
    }
}

pub struct ArbitrageAnalyzer {
    config: AnalyzerConfig,
    bounds: QuoteBounds,
}

impl ArbitrageAnalyzer {
    pub fn new(config: AnalyzerConfig, bounds: QuoteBounds) -> Self {
        Self { config, bounds }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, outcomes: Vec<FetchOutcome>) -> Report {
        self.analyze_at(outcomes, Utc::now())
    }

    /// Same as [`analyze`](Self::analyze) with an explicit clock, for
    /// staleness checks.
    pub fn analyze_at(&self, outcomes: Vec<FetchOutcome>, now: DateTime<Utc>) -> Report {
        self.analyze_cycle(Uuid::new_v4(), outcomes, now)
    }

    /// Analysis for a cycle whose id was assigned by the caller.
    pub fn analyze_cycle(
        &self,
        cycle_id: Uuid,
        outcomes: Vec<FetchOutcome>,
        now: DateTime<Utc>,
    ) -> Report {
        let mut quotes = Vec::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome {
                FetchOutcome::Quote(quote) => match self.admit(&quote, now) {
                    Ok(()) => quotes.push(quote),
                    Err(e) => {
                        debug!(source = %quote.source_id, error = %e, "quote rejected at analysis");
                        failures.push(Failure::new(
                            quote.source_id,
                            FailureKind::Validation,
                            e.to_string(),
                        ));
                    }
                },
                FetchOutcome::Failure(failure) => failures.push(failure),
            }
        }

        quotes.sort_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        failures.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let opportunities = find_opportunities(&quotes, self.config.threshold_percent);

        Report {
            cycle_id,
            generated_at: now,
            threshold_percent: self.config.threshold_percent,
            summary: price_summary(&quotes),
            opportunity_stats: opportunity_stats(&opportunities),
            market: market_stats(&quotes),
            quotes,
            failures,
            opportunities,
        }
    }

    fn admit(&self, quote: &Quote, now: DateTime<Utc>) -> Result<(), ValidationError> {
        self.bounds.recheck(quote)?;

        let age_secs = (now - quote.captured_at).num_seconds();
        let limit_secs = i64::try_from(self.config.max_quote_age.as_secs()).unwrap_or(i64::MAX);
        if age_secs > limit_secs {
            return Err(ValidationError::Stale {
                age_secs,
                limit_secs,
            });
        }
        Ok(())
    }
}

/// Every pair of distinct sources whose percent spread is strictly above
/// `threshold_percent`, best first.
///
/// The cheaper source buys; on equal prices the smaller id buys (the
/// resulting 0% spread never survives a non-negative threshold).
pub fn find_opportunities(
    quotes: &[Quote],
    threshold_percent: Decimal,
) -> Vec<ArbitrageOpportunity> {
    let mut found = Vec::new();

    for (i, a) in quotes.iter().enumerate() {
        for b in &quotes[i + 1..] {
            if a.source_id == b.source_id {
                continue;
            }

            let (buy, sell) = match a.price.cmp(&b.price) {
                std::cmp::Ordering::Less => (a, b),
                std::cmp::Ordering::Greater => (b, a),
                std::cmp::Ordering::Equal if a.source_id <= b.source_id => (a, b),
                std::cmp::Ordering::Equal => (b, a),
            };
            if buy.price.is_zero() {
                continue;
            }

            let absolute_spread = sell.price - buy.price;
            let percent_spread = absolute_spread / buy.price * Decimal::ONE_HUNDRED;
            if percent_spread <= threshold_percent {
                continue;
            }

            found.push(ArbitrageOpportunity {
                buy_source: buy.source_id.clone(),
                sell_source: sell.source_id.clone(),
                buy_price: buy.price,
                sell_price: sell.price,
                absolute_spread,
                percent_spread,
            });
        }
    }

    found.sort_by(|x, y| {
        y.percent_spread
            .cmp(&x.percent_spread)
            .then_with(|| y.absolute_spread.cmp(&x.absolute_spread))
            .then_with(|| x.buy_source.cmp(&y.buy_source))
            .then_with(|| x.sell_source.cmp(&y.sell_source))
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn quote_at(id: &str, price: Decimal, captured_at: DateTime<Utc>) -> Quote {
        Quote {
            source_id: id.into(),
            price,
            change_absolute: None,
            change_percent: None,
            captured_at,
        }
    }

    fn outcome(id: &str, price: Decimal) -> FetchOutcome {
        FetchOutcome::Quote(quote_at(id, price, Utc::now()))
    }

    fn small_bounds() -> QuoteBounds {
        QuoteBounds {
            min_price: dec!(50),
            max_price: dec!(500),
            max_daily_change: dec!(50),
        }
    }

    fn analyzer(threshold: Decimal) -> ArbitrageAnalyzer {
        ArbitrageAnalyzer::new(
            AnalyzerConfig {
                threshold_percent: threshold,
                ..AnalyzerConfig::default()
            },
            small_bounds(),
        )
    }

    fn pairs(report: &Report) -> Vec<(String, String)> {
        report
            .opportunities
            .iter()
            .map(|o| (o.buy_source.to_string(), o.sell_source.to_string()))
            .collect()
    }

    #[test]
    fn three_sources_rank_by_percent() {
        let report = analyzer(dec!(1)).analyze(vec![
            outcome("A", dec!(100)),
            outcome("B", dec!(101)),
            outcome("C", dec!(103)),
        ]);

        // A->B is exactly 1%, which the strict threshold excludes
        assert_eq!(
            pairs(&report),
            vec![
                ("A".to_string(), "C".to_string()),
                ("B".to_string(), "C".to_string())
            ]
        );
        assert_eq!(report.opportunities[0].percent_spread, dec!(3));
        assert_eq!(report.opportunities[0].absolute_spread, dec!(3));

        let summary = report.summary.as_ref().unwrap();
        assert_eq!(summary.lowest.source_id.as_str(), "A");
        assert_eq!(summary.highest.source_id.as_str(), "C");
        assert_eq!(summary.range, dec!(3));
        assert_eq!(summary.range_percent, dec!(3));
    }

    #[test]
    fn single_quote_has_summary_but_no_opportunities() {
        let report = analyzer(dec!(0)).analyze(vec![outcome("A", dec!(100))]);
        assert!(report.opportunities.is_empty());
        let summary = report.summary.unwrap();
        assert_eq!(summary.lowest, summary.highest);
        assert_eq!(summary.range, Decimal::ZERO);
        assert!(report.market.is_none());
    }

    #[test]
    fn no_quotes_yields_empty_report() {
        let failure = Failure::new("A".into(), FailureKind::Transport, "connection refused");
        let report = analyzer(dec!(1)).analyze(vec![FetchOutcome::Failure(failure)]);
        assert!(report.quotes.is_empty());
        assert!(report.opportunities.is_empty());
        assert!(report.summary.is_none());
        assert!(report.opportunity_stats.is_none());
        assert_eq!(report.failure_count(), 1);
    }

    #[test]
    fn equal_prices_never_qualify() {
        let report = analyzer(dec!(0)).analyze(vec![outcome("B", dec!(100)), outcome("A", dec!(100))]);
        assert!(report.opportunities.is_empty());
    }

    #[test]
    fn raising_threshold_only_removes_opportunities() {
        let outcomes = || {
            vec![
                outcome("A", dec!(100)),
                outcome("B", dec!(101.5)),
                outcome("C", dec!(102)),
                outcome("D", dec!(110)),
            ]
        };
        let low = analyzer(dec!(0.5)).analyze(outcomes());
        let high = analyzer(dec!(2)).analyze(outcomes());

        let low_pairs = pairs(&low);
        assert!(high.opportunities.len() <= low.opportunities.len());
        for pair in pairs(&high) {
            assert!(low_pairs.contains(&pair));
        }
    }

    #[test]
    fn ranking_is_independent_of_input_order() {
        let forward = analyzer(dec!(0)).analyze(vec![
            outcome("A", dec!(100)),
            outcome("B", dec!(104)),
            outcome("C", dec!(102)),
        ]);
        let reversed = analyzer(dec!(0)).analyze(vec![
            outcome("C", dec!(102)),
            outcome("B", dec!(104)),
            outcome("A", dec!(100)),
        ]);
        assert_eq!(forward.opportunities, reversed.opportunities);
        let ids = |r: &Report| r.quotes.iter().map(|q| q.source_id.to_string()).collect::<Vec<_>>();
        assert_eq!(ids(&forward), vec!["A", "C", "B"]);
        assert_eq!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn equal_percent_ranks_by_absolute_spread() {
        let report = analyzer(dec!(0)).analyze(vec![
            outcome("A", dec!(100)),
            outcome("B", dec!(102)),
            outcome("C", dec!(200)),
            outcome("D", dec!(204)),
        ]);

        let order: Vec<String> = pairs(&report)
            .into_iter()
            .map(|(buy, sell)| buy + &sell)
            .collect();
        // BD and AC are both 100%, CD and AB both 2%: larger spread first
        assert_eq!(order, vec!["AD", "BD", "AC", "BC", "CD", "AB"]);
        assert_eq!(report.opportunities[4].absolute_spread, dec!(4));
        assert_eq!(report.opportunities[5].absolute_spread, dec!(2));
    }

    #[test]
    fn full_ties_rank_by_buy_then_sell_source() {
        let report = analyzer(dec!(0)).analyze(vec![
            outcome("D", dec!(102)),
            outcome("C", dec!(100)),
            outcome("B", dec!(102)),
            outcome("A", dec!(100)),
        ]);

        assert_eq!(
            pairs(&report),
            vec![
                ("A".to_string(), "B".to_string()),
                ("A".to_string(), "D".to_string()),
                ("C".to_string(), "B".to_string()),
                ("C".to_string(), "D".to_string()),
            ]
        );
    }

    #[test]
    fn repeated_analysis_is_identical() {
        let outcomes = vec![
            outcome("A", dec!(100)),
            outcome("B", dec!(102)),
            outcome("C", dec!(100)),
            outcome("D", dec!(104)),
        ];
        let analyzer = analyzer(dec!(0.5));

        let first = analyzer.analyze(outcomes.clone());
        let second = analyzer.analyze(outcomes);
        assert!(!first.opportunities.is_empty());
        assert_eq!(first.opportunities, second.opportunities);
    }

    #[test]
    fn out_of_range_quote_becomes_validation_failure() {
        let report = analyzer(dec!(1)).analyze(vec![
            outcome("A", dec!(100)),
            outcome("B", dec!(1000)),
        ]);
        assert_eq!(report.quote_count(), 1);
        assert_eq!(report.failures[0].source_id.as_str(), "B");
        assert_eq!(report.failures[0].kind, FailureKind::Validation);
        assert!(report.opportunities.is_empty());
    }

    #[test]
    fn stale_quote_is_excluded() {
        let now = Utc::now();
        let fresh = quote_at("A", dec!(100), now - ChronoDuration::seconds(30));
        let stale = quote_at("B", dec!(120), now - ChronoDuration::minutes(11));

        let report = analyzer(dec!(1)).analyze_at(
            vec![FetchOutcome::Quote(fresh), FetchOutcome::Quote(stale)],
            now,
        );

        assert_eq!(report.quote_count(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Validation);
        assert!(report.failures[0].detail.contains("stale"));
    }

    #[test]
    fn same_source_twice_is_not_a_pair() {
        let found = find_opportunities(
            &[
                quote_at("A", dec!(100), Utc::now()),
                quote_at("A", dec!(120), Utc::now()),
            ],
            dec!(0),
        );
        assert!(found.is_empty());
    }
}
