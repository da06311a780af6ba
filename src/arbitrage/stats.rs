//! Summary statistics over quotes and opportunities

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::report::{MarketEfficiency, MarketStats, OpportunityStats, PricePoint, PriceSummary};
use crate::types::{ArbitrageOpportunity, Quote};

impl MarketEfficiency {
    pub fn from_volatility(volatility_percent: Decimal) -> Self {
        if volatility_percent < dec!(0.5) {
            MarketEfficiency::HighlyEfficient
        } else if volatility_percent < dec!(1) {
            MarketEfficiency::Moderate
        } else {
            MarketEfficiency::Volatile
        }
    }
}

/// Min/max with attribution. Ties go to the smaller source id.
pub fn price_summary(quotes: &[Quote]) -> Option<PriceSummary> {
    let key = |q: &&Quote| (q.price, q.source_id.clone());
    let lowest = quotes.iter().min_by_key(key)?;
    let highest = quotes
        .iter()
        .max_by(|a, b| a.price.cmp(&b.price).then_with(|| b.source_id.cmp(&a.source_id)))?;

    let range = highest.price - lowest.price;
    let range_percent = if lowest.price.is_zero() {
        Decimal::ZERO
    } else {
        range / lowest.price * Decimal::ONE_HUNDRED
    };

    Some(PriceSummary {
        lowest: PricePoint {
            source_id: lowest.source_id.clone(),
            price: lowest.price,
        },
        highest: PricePoint {
            source_id: highest.source_id.clone(),
            price: highest.price,
        },
        range,
        range_percent,
    })
}

pub fn opportunity_stats(opportunities: &[ArbitrageOpportunity]) -> Option<OpportunityStats> {
    let first = opportunities.first()?;
    let count = opportunities.len();

    let mut best_percent = first.percent_spread;
    let mut lowest_percent = first.percent_spread;
    let mut best_absolute = first;
    let mut percent_sum = Decimal::ZERO;
    let mut total_absolute = Decimal::ZERO;

    for opp in opportunities {
        best_percent = best_percent.max(opp.percent_spread);
        lowest_percent = lowest_percent.min(opp.percent_spread);
        if opp.absolute_spread > best_absolute.absolute_spread {
            best_absolute = opp;
        }
        percent_sum += opp.percent_spread;
        total_absolute += opp.absolute_spread;
    }

    Some(OpportunityStats {
        count,
        best_percent,
        lowest_percent,
        average_percent: percent_sum / Decimal::from(count),
        best_absolute: best_absolute.clone(),
        total_absolute,
    })
}

/// Average, population standard deviation and volatility; needs at least
/// two quotes.
pub fn market_stats(quotes: &[Quote]) -> Option<MarketStats> {
    if quotes.len() < 2 {
        return None;
    }

    let n = Decimal::from(quotes.len());
    let average_price = quotes.iter().map(|q| q.price).sum::<Decimal>() / n;
    if average_price.is_zero() {
        return None;
    }

    let variance = quotes
        .iter()
        .map(|q| {
            let d = q.price - average_price;
            d * d
        })
        .sum::<Decimal>()
        / n;

    // sqrt through f64; prices fit comfortably and the result is display-only
    let std_dev = variance
        .to_f64()
        .map(f64::sqrt)
        .and_then(Decimal::from_f64)?
        .round_dp(2);
    let volatility_percent = std_dev / average_price * Decimal::ONE_HUNDRED;

    Some(MarketStats {
        average_price: average_price.round_dp(2),
        std_dev,
        volatility_percent,
        efficiency: MarketEfficiency::from_volatility(volatility_percent),
    })
}
