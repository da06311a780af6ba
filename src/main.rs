//! GoldArb - gold price arbitrage monitor
//!
//! Runs one collection cycle (`run.once`) or loops on `run.interval_secs`
//! until Ctrl-C.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use goldarb::config::AppConfig;
use goldarb::fetch::BrowserPool;
use goldarb::logging::init_logging;
use goldarb::oracle::SourceRegistry;
use goldarb::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);
    config.validate().context("Invalid configuration")?;

    info!(config = %config.digest(), "starting goldarb");

    let pool = browser_pool(&config);
    let registry = SourceRegistry::from_config(&config, &pool)?;
    info!(sources = ?registry.ids(), "sources ready");

    let pipeline = Pipeline::from_config(&config, registry)?;
    info!(sinks = ?pipeline.sink_names(), "pipeline ready");

    if config.run.once {
        let report = pipeline.run_once().await?;
        if report.quote_count() < config.run.min_quotes {
            bail!(
                "only {} of the required {} quotes collected",
                report.quote_count(),
                config.run.min_quotes
            );
        }
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(config.run.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match pipeline.run_once().await {
                    Ok(report) if report.quote_count() < config.run.min_quotes => {
                        warn!(
                            quotes = report.quote_count(),
                            required = config.run.min_quotes,
                            "too few quotes this cycle"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(feature = "browser")]
fn browser_pool(config: &AppConfig) -> BrowserPool {
    use goldarb::fetch::WebDriver;
    use std::sync::Arc;

    let driver = WebDriver::new(
        config.browser.webdriver_url.clone(),
        config.browser.headless,
        Duration::from_secs(config.browser.wait_secs),
    );
    BrowserPool::new(Arc::new(driver), config.browser.pool_size)
}

#[cfg(not(feature = "browser"))]
fn browser_pool(_config: &AppConfig) -> BrowserPool {
    warn!("built without the `browser` feature; rendered sources will fail");
    BrowserPool::disabled()
}
