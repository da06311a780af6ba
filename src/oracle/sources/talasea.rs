//! Talasea (talasea.ir)
//!
//! Trading-platform layout that changes often, so the price is searched in
//! four passes: labelled value, amount followed by a currency word, known
//! price classes, and finally any amount in the plausible Rial range.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use super::extract::{parse_amount, Page, PriceUnit, AMOUNT_RE};
use super::SourceAdapter;
use crate::error::ExtractError;
use crate::fetch::{FetchTarget, TransportKind};
use crate::types::{QuoteBounds, RawQuote, SourceId};

const TALASEA_URL: &str = "https://talasea.ir/";

const PRICE_CLASSES: &str =
    "td.price, span.price, div.price, .gold-price, [data-price], .price-value, .current-price";

static PRICE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"قیمت.*طلا.*18.*عیار|طلا.*18.*عیار.*قیمت").expect("valid label regex")
});

static CURRENCY_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+)\s*(ریال|تومان)").expect("valid currency regex")
});

static RANGE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d,])(\d{2,3},\d{3},\d{3})(?:$|[^\d,])").expect("valid amount regex")
});

static CHANGE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"تغییرات|تغییر|رشد|کاهش").expect("valid change regex"));

pub struct TalaseaSource {
    id: SourceId,
    /// Range used to accept an unlabelled amount in the last pass
    plausible: QuoteBounds,
}

impl TalaseaSource {
    pub fn new() -> Self {
        Self::with_bounds(QuoteBounds::default())
    }

    /// Use the deployment's validation bounds for the unlabelled-amount pass
    pub fn with_bounds(plausible: QuoteBounds) -> Self {
        Self {
            id: SourceId::from("talasea"),
            plausible,
        }
    }

    fn locate(&self, page: &Page) -> Result<Option<(String, PriceUnit)>, ExtractError> {
        if let Some(amount) = page.labelled_value(&PRICE_LABEL, &AMOUNT_RE) {
            return Ok(Some((amount, PriceUnit::RialPerGram)));
        }

        let with_currency = page.captures_in_text(&CURRENCY_AMOUNT).into_iter().find_map(|caps| {
            let amount = caps.get(1).cloned().flatten()?;
            let unit = caps
                .get(2)
                .cloned()
                .flatten()
                .and_then(|word| PriceUnit::from_currency_word(&word))?;
            Some((amount, unit))
        });
        if with_currency.is_some() {
            return Ok(with_currency);
        }

        let by_class = page
            .select_texts(PRICE_CLASSES)?
            .iter()
            .find_map(|text| AMOUNT_RE.captures(text).and_then(|c| c.get(1)))
            .map(|m| (m.as_str().to_string(), PriceUnit::RialPerGram));
        if by_class.is_some() {
            return Ok(by_class);
        }

        Ok(page
            .find_where(&RANGE_AMOUNT, |candidate| self.is_plausible(candidate))
            .map(|amount| (amount, PriceUnit::RialPerGram)))
    }

    fn is_plausible(&self, candidate: &str) -> bool {
        parse_amount(candidate)
            .map(|value: Decimal| self.plausible.check_price(value).is_ok())
            .unwrap_or(false)
    }
}

impl Default for TalaseaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for TalaseaSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn target(&self) -> FetchTarget {
        FetchTarget::new(TALASEA_URL)
    }

    fn default_transport(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn parse(&self, html: &str, captured_at: DateTime<Utc>) -> Result<RawQuote, ExtractError> {
        let page = Page::parse(html);

        let (amount, unit) = self
            .locate(&page)?
            .ok_or_else(|| ExtractError::PriceNotFound("18k gram price on talasea.ir".into()))?;
        let price = unit.to_rial_per_gram(parse_amount(&amount)?);
        let change = page.change_percent(Some(&CHANGE_LABEL));

        Ok(RawQuote::new(price, captured_at).with_change_percent(change))
    }
}
