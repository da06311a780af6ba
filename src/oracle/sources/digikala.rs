//! Digikala digital gold (digikala.com)
//!
//! Client-rendered and slow to populate. Quotes Rial per milligram
//! (`۸۶,۶۱۰`), so the value is scaled by 1000 to Rial per gram.

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

const DIGIKALA_URL: &str = "https://digikala.com/wealth/landing/digital-gold";

static PERSIAN_MG_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^۰-۹,٬])([۰-۹]{2,3}[,٬][۰-۹]{3})(?:$|[^۰-۹,٬])")
        .expect("valid digikala regex")
});

static LATIN_MG_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9,])([0-9]{2,3},[0-9]{3})(?:$|[^0-9,])").expect("valid digikala regex")
});

pub struct DigikalaSource {
    id: SourceId,
}

impl DigikalaSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::from("digikala"),
        }
    }
}

impl Default for DigikalaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DigikalaSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(DIGIKALA_URL).settle(Duration::from_secs(8))
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Rendered
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let page = Page::parse(html);
        let amount = page
            .find_raw(&PERSIAN_MG_AMOUNT)
            .or_else(|| page.find_raw(&LATIN_MG_AMOUNT))
            .ok_or_else(|| ExtractError::PriceNotFound("milligram price on digikala.com".into()))?;

        let price = PriceUnit::RialPerMilligram.to_rial_per_gram(parse_amount(&amount)?);
        Ok(RawQuote::new(price, captured_at))
    }
}
