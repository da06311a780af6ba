//! Melli Gold (melligold.com)
//!
//! Client-rendered. Toman per gram in grouped digits, with a daily percent
//! change whose sign may only be shown by colour.

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

const MELLI_URL: &str = "https://melligold.com/";

static TOMAN_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d,])(\d,\d{3},\d{3})(?:$|[^\d,])").expect("valid melli regex")
});

pub struct MelliSource {
    id: SourceId,
}

impl MelliSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::from("melli"),
        }
    }
}

impl Default for MelliSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for MelliSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(MELLI_URL).settle(Duration::from_secs(4))
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Rendered
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let page = Page::parse(html);
        let amount = page
            .find(&TOMAN_AMOUNT)
            .ok_or_else(|| ExtractError::PriceNotFound("gram price on melligold.com".into()))?;

        let price = PriceUnit::TomanPerGram.to_rial_per_gram(parse_amount(&amount)?);
        let change = page.change_percent(None);

        Ok(RawQuote::new(price, captured_at).with_change_percent(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_and_coloured_change() {
        let html = r#"<div class="card">
            <p>8,712,300</p>
            <span class="change is-negative">0.42 %</span>
        </div>"#;
        let raw = MelliSource::new().parse(html, Utc::now()).unwrap();
        assert_eq!(raw.price, dec!(87123000));
        assert_eq!(raw.change_percent, Some(dec!(-0.42)));
    }

    #[test]
    fn explicit_sign_wins() {
        let html = r#"<div><p>۸,۷۱۲,۳۰۰</p><span class="text-red">+0.42%</span></div>"#;
        let raw = MelliSource::new().parse(html, Utc::now()).unwrap();
        assert_eq!(raw.price, dec!(87123000));
        assert_eq!(raw.change_percent, Some(dec!(0.42)));
    }
}
