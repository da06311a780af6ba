//! Error types at the library boundaries
//!
//! Adapter-level errors never escape an adapter: they are folded into a
//! `Failure` value. Only `ConfigError` is fatal to a cycle.

use std::time::Duration;

use thiserror::Error;

use crate::types::SourceId;

/// Errors detected before any adapter runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown source id: {0}")]
    UnknownSource(SourceId),

    #[error("duplicate source id: {0}")]
    DuplicateSource(SourceId),

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Raw retrieval failures, produced by a `Fetcher`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),

    #[error("browser session error: {0}")]
    Browser(String),

    #[error("rendered transport unavailable: {0}")]
    Unavailable(String),

    #[error("empty response body from {0}")]
    EmptyBody(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed within the same cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::TimedOut(_) => true,
            TransportError::EmptyBody(_) => true,
            TransportError::Browser(_) | TransportError::Unavailable(_) => false,
        }
    }
}

/// Structural failures while locating a price in fetched content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("price not found: {0}")]
    PriceNotFound(String),

    #[error("not a number: {0:?}")]
    NotANumber(String),

    #[error("invalid selector {0}")]
    Selector(String),
}

/// A value was located but falls outside plausible bounds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfRange {
        price: String,
        min: String,
        max: String,
    },

    #[error("change {change}% exceeds +/-{limit}%")]
    ChangeOutOfRange { change: String, limit: String },

    #[error("quote is stale: captured {age_secs}s ago (limit {limit_secs}s)")]
    Stale { age_secs: i64, limit_secs: i64 },
}
