//! Goldika (goldika.ir)
//!
//! Client-rendered; needs the rendered transport. The price is published
//! in Persian digits, Toman per gram, as a seven-digit grouped number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use super::extract::{parse_amount, Page, PriceUnit};
use super::SourceAdapter;
use crate::error::ExtractError;
use crate::fetch::{FetchTarget, TransportKind};
use crate::types::{RawQuote, SourceId};

const GOLDIKA_URL: &str = "https://goldika.ir/";

/// `۸,۶۹۰,۰۰۰` in Persian digits, not part of a longer number
static TOMAN_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^۰-۹,٬])([۰-۹][,٬][۰-۹]{3}[,٬][۰-۹]{3})(?:$|[^۰-۹,٬])")
        .expect("valid goldika regex")
});

pub struct GoldikaSource {
    id: SourceId,
}

impl GoldikaSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::from("goldika"),
        }
    }
}

impl Default for GoldikaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for GoldikaSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(GOLDIKA_URL).settle(Duration::from_secs(4))
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Rendered
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let page = Page::parse(html);
        let amount = page
            .find_raw(&TOMAN_AMOUNT)
            .ok_or_else(|| ExtractError::PriceNotFound("Persian-digit price on goldika.ir".into()))?;

        let price = PriceUnit::TomanPerGram.to_rial_per_gram(parse_amount(&amount)?);
        Ok(RawQuote::new(price, captured_at))
    }
}
