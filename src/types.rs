//! Core types used throughout GoldArb
//!
//! Quotes, failures and opportunities. Every price is a `Decimal` in Rial per
//! gram of 18-carat gold; conversion from a source's own unit happens inside
//! the adapter before a `Quote` exists.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Stable identifier of a data source (e.g. "milli", "talasea")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An extracted but not yet validated observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuote {
    pub price: Decimal,
    pub change_absolute: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}

impl RawQuote {
    pub fn new(price: Decimal, captured_at: DateTime<Utc>) -> Self {
        Self {
            price,
            change_absolute: None,
            change_percent: None,
            captured_at,
        }
    }

    pub fn with_change_percent(mut self, change: Option<Decimal>) -> Self {
        self.change_percent = change;
        self
    }
}

/// One validated price observation from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub source_id: SourceId,
    /// Rial per gram
    pub price: Decimal,
    pub change_absolute: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}

/// Plausibility limits applied to every quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBounds {
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Absolute limit on `change_percent`
    pub max_daily_change: Decimal,
}

impl Default for QuoteBounds {
    fn default() -> Self {
        Self {
            min_price: dec!(50000000),
            max_price: dec!(200000000),
            max_daily_change: dec!(50),
        }
    }
}

impl QuoteBounds {
    pub fn check_price(&self, price: Decimal) -> Result<(), ValidationError> {
        if price < self.min_price || price > self.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price: price.to_string(),
                min: self.min_price.to_string(),
                max: self.max_price.to_string(),
            });
        }
        Ok(())
    }

    pub fn check_change(&self, change_percent: Option<Decimal>) -> Result<(), ValidationError> {
        match change_percent {
            Some(change) if change.abs() > self.max_daily_change => {
                Err(ValidationError::ChangeOutOfRange {
                    change: change.to_string(),
                    limit: self.max_daily_change.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Turn a raw observation into a `Quote`, rejecting (never clamping)
    /// values outside the configured range.
    pub fn validate(&self, source_id: &SourceId, raw: RawQuote) -> Result<Quote, ValidationError> {
        self.check_price(raw.price)?;
        self.check_change(raw.change_percent)?;

        Ok(Quote {
            source_id: source_id.clone(),
            price: raw.price,
            change_absolute: raw.change_absolute,
            change_percent: raw.change_percent,
            captured_at: raw.captured_at,
        })
    }

    /// Re-check an already built quote.
    pub fn recheck(&self, quote: &Quote) -> Result<(), ValidationError> {
        self.check_price(quote.price)?;
        self.check_change(quote.change_percent)
    }
}

/// Why a source produced no usable quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or browser I/O error, or a non-success response
    Transport,
    /// Expected price location not found or not parseable
    Parse,
    /// Value present but outside plausible bounds, or stale
    Validation,
    /// Did not finish within its slice or the cycle deadline
    Timeout,
    /// Adapter task panicked or was aborted
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "TransportFailure"),
            FailureKind::Parse => write!(f, "ParseFailure"),
            FailureKind::Validation => write!(f, "ValidationError"),
            FailureKind::Timeout => write!(f, "Timeout"),
            FailureKind::Internal => write!(f, "Internal"),
        }
    }
}

/// A source that produced no usable quote this cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub source_id: SourceId,
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(source_id: SourceId, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            source_id,
            kind,
            detail: detail.into(),
        }
    }
}

/// Result of one adapter invocation
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Quote(Quote),
    Failure(Failure),
}

impl FetchOutcome {
    pub fn source_id(&self) -> &SourceId {
        match self {
            FetchOutcome::Quote(q) => &q.source_id,
            FetchOutcome::Failure(f) => &f.source_id,
        }
    }

    pub fn is_quote(&self) -> bool {
        matches!(self, FetchOutcome::Quote(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchOutcome::Quote(_) => None,
            FetchOutcome::Failure(f) => Some(f.kind),
        }
    }
}

impl From<Quote> for FetchOutcome {
    fn from(q: Quote) -> Self {
        FetchOutcome::Quote(q)
    }
}

impl From<Failure> for FetchOutcome {
    fn from(f: Failure) -> Self {
        FetchOutcome::Failure(f)
    }
}

/// Buy low at one source, sell high at another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub buy_source: SourceId,
    pub sell_source: SourceId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub absolute_spread: Decimal,
    pub percent_spread: Decimal,
}
