//! Talapp (talapp.ir)
//!
//! Client-rendered, but the price is in the first paint so no settle delay
//! is needed. Toman per gram.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::{parse_amount, Page, PriceUnit};
use super::SourceAdapter;
use crate::error::ExtractError;
use crate::fetch::{FetchTarget, TransportKind};
use crate::types::{RawQuote, SourceId};

const TALAPP_URL: &str = "https://talapp.ir/";

static TOMAN_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d,])(\d,\d{3},\d{3})(?:$|[^\d,])").expect("valid talapp regex")
});

pub struct TalappSource {
    id: SourceId,
}

impl TalappSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::from("talapp"),
        }
    }
}

impl Default for TalappSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for TalappSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(TALAPP_URL)
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Rendered
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let amount = Page::parse(html)
            .find(&TOMAN_AMOUNT)
            .ok_or_else(|| ExtractError::PriceNotFound("gram price on talapp.ir".into()))?;

        let price = PriceUnit::TomanPerGram.to_rial_per_gram(parse_amount(&amount)?);
        Ok(RawQuote::new(price, captured_at))
    }
}
