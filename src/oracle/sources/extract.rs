//! Shared extraction helpers for source adapters
//!
//! Gold sites publish prices in Persian or Arabic-Indic digits, in Rial or
//! Toman, per gram or per milligram, with or without separators. These
//! helpers turn any of that into a `Decimal` of Rial per gram.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;

use crate::error::ExtractError;

/// Thousands-separated amount, e.g. `86,610,000`
pub static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3}(?:,\d{3})+)\b").expect("valid amount regex"));

/// Percent change with optional sign, e.g. `+1.47%`, `-0.3 %`, `1,47%`
pub static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([+\-−]?\s*\d+(?:[.,]\d+)?)\s*%").expect("valid percent regex"));

/// Block-level elements whose text is scanned for prices
const TEXT_BLOCKS: &str = "div, span, p, td, li, strong, b";

/// Map Persian (U+06F0..) and Arabic-Indic (U+0660..) digits and
/// punctuation to their ASCII equivalents.
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '۰'..='۹' => char::from(b'0' + (c as u32 - '۰' as u32) as u8),
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            '٫' => '.',
            '٬' | '،' => ',',
            '٪' => '%',
            '−' => '-',
            _ => c,
        })
        .collect()
}

/// Parse a positive amount, dropping separators, currency words and
/// whitespace.
pub fn parse_amount(text: &str) -> Result<Decimal, ExtractError> {
    let normalized = normalize_digits(text);
    let cleaned: String = normalized
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return Err(ExtractError::NotANumber(text.to_string()));
    }
    Decimal::from_str(&cleaned).map_err(|_| ExtractError::NotANumber(text.to_string()))
}

/// Parse a signed percentage. A comma is read as the decimal mark, and a
/// sign may trail the number as it often does in right-to-left layouts.
pub fn parse_percent(text: &str) -> Result<Decimal, ExtractError> {
    let normalized = normalize_digits(text);
    let trimmed = normalized.trim().trim_end_matches('%').trim();

    let (negative, body) = if let Some(rest) = trimmed.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix('+') {
        (false, rest)
    } else if let Some(rest) = trimmed.strip_suffix('-') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_suffix('+') {
        (false, rest)
    } else {
        (false, trimmed)
    };

    let digits: String = body
        .trim()
        .chars()
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let value = Decimal::from_str(&digits).map_err(|_| ExtractError::NotANumber(text.to_string()))?;

    Ok(if negative { -value } else { value })
}

/// Whether a percent string carries an explicit sign
pub fn has_sign(text: &str) -> bool {
    let t = normalize_digits(text);
    let t = t.trim().trim_end_matches('%').trim();
    t.starts_with(['+', '-']) || t.ends_with(['+', '-'])
}

/// Unit a source publishes its price in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnit {
    RialPerGram,
    TomanPerGram,
    RialPerMilligram,
    TomanPerMilligram,
}

impl PriceUnit {
    pub fn to_rial_per_gram(self, amount: Decimal) -> Decimal {
        let factor = match self {
            PriceUnit::RialPerGram => 1u32,
            PriceUnit::TomanPerGram => 10,
            PriceUnit::RialPerMilligram => 1_000,
            PriceUnit::TomanPerMilligram => 10_000,
        };
        amount * Decimal::from(factor)
    }

    /// Currency word following a number ("ریال" or "تومان")
    pub fn from_currency_word(word: &str) -> Option<Self> {
        match word.trim() {
            "ریال" => Some(PriceUnit::RialPerGram),
            "تومان" => Some(PriceUnit::TomanPerGram),
            _ => None,
        }
    }
}

/// Direction hinted by markup around an unsigned change value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn apply(self, value: Decimal) -> Decimal {
        match self {
            Direction::Up => value.abs(),
            Direction::Down => -value.abs(),
        }
    }
}

const UP_HINTS: &[&str] = &["green", "positive", "up", "increase", "rise", "success"];
const DOWN_HINTS: &[&str] = &["red", "negative", "down", "decrease", "fall", "danger"];

/// A parsed HTML page
pub struct Page {
    doc: Html,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    fn selector(css: &str) -> Result<Selector, ExtractError> {
        Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{css}: {e}")))
    }

    fn element_text(el: &ElementRef<'_>) -> String {
        el.text().collect::<Vec<_>>().join(" ").trim().to_string()
    }

    /// Visible text of every block element, in document order, as published
    pub fn blocks(&self) -> Vec<String> {
        let Ok(selector) = Self::selector(TEXT_BLOCKS) else {
            return Vec::new();
        };
        self.doc
            .select(&selector)
            .map(|el| Self::element_text(&el))
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// First capture of `re` in any block's raw text (digits untouched)
    pub fn find_raw(&self, re: &Regex) -> Option<String> {
        self.blocks().iter().find_map(|text| capture(re, text))
    }

    /// First capture of `re` in any block's text after digit normalization
    pub fn find(&self, re: &Regex) -> Option<String> {
        self.find_where(re, |_| true)
    }

    /// First normalized capture that also satisfies `accept`
    pub fn find_where(&self, re: &Regex, accept: impl Fn(&str) -> bool) -> Option<String> {
        self.blocks().iter().find_map(|text| {
            let normalized = normalize_digits(text);
            re.captures_iter(&normalized)
                .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str().to_string())
                .find(|m| accept(m))
        })
    }

    /// All captures of `re` (with their full match) across the normalized
    /// document text
    pub fn captures_in_text(&self, re: &Regex) -> Vec<Vec<Option<String>>> {
        let text = normalize_digits(&self.doc.root_element().text().collect::<Vec<_>>().join(" "));
        re.captures_iter(&text)
            .map(|caps| {
                caps.iter()
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect()
            })
            .collect()
    }

    /// Normalized text of elements matching a CSS selector
    pub fn select_texts(&self, css: &str) -> Result<Vec<String>, ExtractError> {
        let selector = Self::selector(css)?;
        Ok(self
            .doc
            .select(&selector)
            .map(|el| normalize_digits(&Self::element_text(&el)))
            .filter(|t| !t.is_empty())
            .collect())
    }

    /// Value in an element following the element whose own text matches
    /// `label`; falls back to the label element's text itself.
    pub fn labelled_value(&self, label: &Regex, value: &Regex) -> Option<String> {
        let selector = Self::selector(TEXT_BLOCKS).ok()?;

        for el in self.doc.select(&selector) {
            let own_text: String = el
                .children()
                .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
                .collect::<Vec<_>>()
                .join(" ");
            if !label.is_match(&normalize_digits(&own_text)) {
                continue;
            }

            for sibling in el.next_siblings().filter_map(ElementRef::wrap) {
                let text = normalize_digits(&Self::element_text(&sibling));
                if let Some(found) = capture(value, &text) {
                    return Some(found);
                }
            }
            if let Some(parent) = el.parent().and_then(ElementRef::wrap) {
                let text = normalize_digits(&Self::element_text(&parent));
                let after_label = match label.find(&text) {
                    Some(m) => &text[m.end()..],
                    None => text.as_str(),
                };
                if let Some(found) = capture(value, after_label) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Colour or direction hint for the value `needle`, read from the
    /// innermost element showing it, then its ancestors.
    pub fn direction_hint(&self, needle: &str) -> Option<Direction> {
        let selector = Self::selector(TEXT_BLOCKS).ok()?;
        let needle = normalize_digits(needle);

        // document order puts descendants after their ancestors
        let innermost = self
            .doc
            .select(&selector)
            .filter(|el| normalize_digits(&Self::element_text(el)).contains(&needle))
            .last()?;

        std::iter::once(innermost)
            .chain(innermost.ancestors().filter_map(ElementRef::wrap))
            .find_map(|el| markup_direction(&el))
    }

    /// Locate a signed percent change: labelled first, then anywhere in the
    /// page; an unsigned value takes its sign from surrounding markup.
    pub fn change_percent(&self, label: Option<&Regex>) -> Option<Decimal> {
        let raw = label
            .and_then(|l| self.labelled_value(l, &PERCENT_RE))
            .or_else(|| self.find(&PERCENT_RE))?;
        let value = parse_percent(&raw).ok()?;

        if has_sign(&raw) {
            return Some(value);
        }
        let unsigned = raw.trim().trim_end_matches('%').trim().to_string();
        Some(match self.direction_hint(&unsigned) {
            Some(direction) => direction.apply(value),
            None => value,
        })
    }
}

/// Direction named by an element's class tokens or inline colour.
/// Tokens match whole dash-separated segments, so `text-red` and
/// `price-up` count while `bordered` and `list-group` do not.
fn markup_direction(el: &ElementRef<'_>) -> Option<Direction> {
    let has_hint = |hints: &[&str]| {
        el.value().classes().any(|class| {
            class
                .to_lowercase()
                .split(['-', '_'])
                .any(|segment| hints.contains(&segment))
        })
    };
    let style = el
        .value()
        .attr("style")
        .unwrap_or_default()
        .to_lowercase()
        .replace(' ', "");

    if has_hint(UP_HINTS) || style.contains("color:green") {
        Some(Direction::Up)
    } else if has_hint(DOWN_HINTS) || style.contains("color:red") {
        Some(Direction::Down)
    } else {
        None
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}
