//! GoldArb Library
//!
//! Collects 18k gold prices from Iranian retail platforms and detects
//! cross-source arbitrage spreads

pub mod arbitrage;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod oracle;
pub mod persistence;
pub mod pipeline;
pub mod report;
pub mod types;
