//! Milli Gold (milli.gold)
//!
//! Server-rendered page. The 18k price sits next to its label, in Rial per
//! gram; the daily change sits next to "تغییرات".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::{parse_amount, Page, PriceUnit, AMOUNT_RE};
use super::SourceAdapter;
use crate::error::ExtractError;
use crate::fetch::{FetchTarget, TransportKind};
use crate::types::{RawQuote, SourceId};

const MILLI_URL: &str = "https://milli.gold/";

static PRICE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"قیمت.*گرم.*طلا.*18.*عیار").expect("valid label regex"));

static RIAL_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+)\s*ریال").expect("valid rial regex")
});

/// Eight-digit Rial amount (`86,610,000`) not embedded in a longer number
static BARE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d,])(\d{2},\d{3},\d{3})(?:$|[^\d,])").expect("valid amount regex")
});

static CHANGE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"تغییرات").expect("valid change regex"));

pub struct MilliSource {
    id: SourceId,
}

impl MilliSource {
    pub fn new() -> Self {
        Self::with_id("milli")
    }

    pub fn with_id(id: impl Into<SourceId>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for MilliSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for MilliSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(MILLI_URL)
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let page = Page::parse(html);

        let amount = page
            .labelled_value(&PRICE_LABEL, &AMOUNT_RE)
            .or_else(|| page.find(&RIAL_AMOUNT))
            .or_else(|| page.find(&BARE_AMOUNT))
            .ok_or_else(|| ExtractError::PriceNotFound("18k gram price on milli.gold".into()))?;

        let price = PriceUnit::RialPerGram.to_rial_per_gram(parse_amount(&amount)?);
        let change = page.change_percent(Some(&CHANGE_LABEL));

        Ok(RawQuote::new(price, captured_at).with_change_percent(change))
    }
}
