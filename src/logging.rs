//! Tracing subscriber setup

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Install the global subscriber once. `RUST_LOG` wins over the configured
/// level; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let builder = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true);

        // try_init: a subscriber installed elsewhere (tests) is not an error
        let _ = if config.json {
            builder.json().with_current_span(true).try_init()
        } else {
            builder.try_init()
        };

        tracing::info!(json = config.json, "logger initialized");
    });
}
