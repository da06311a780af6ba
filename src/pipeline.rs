//! One collection and analysis cycle, end to end
//!
//! orchestrator -> analyzer -> sinks. Sink failures are logged and never
//! fail the cycle.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::arbitrage::ArbitrageAnalyzer;
use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::oracle::{Orchestrator, SourceRegistry};
use crate::persistence::FileSink;
use crate::report::{LogSink, Report, ResultSink};
use crate::types::SourceId;

pub struct Pipeline {
    orchestrator: Orchestrator,
    analyzer: ArbitrageAnalyzer,
    sinks: Vec<Box<dyn ResultSink>>,
    selection: Option<Vec<SourceId>>,
}

impl Pipeline {
    pub fn new(orchestrator: Orchestrator, analyzer: ArbitrageAnalyzer) -> Self {
        Self {
            orchestrator,
            analyzer,
            sinks: Vec::new(),
            selection: None,
        }
    }

    /// Wire everything from configuration: log sink always, file sink when
    /// JSON or CSV output is enabled.
    pub fn from_config(config: &AppConfig, registry: SourceRegistry) -> Result<Self> {
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            config.bounds(),
            config.orchestrator_config(),
        );
        let analyzer = ArbitrageAnalyzer::new(config.analyzer_config(), config.bounds());

        let mut pipeline = Self::new(orchestrator, analyzer)
            .with_sink(LogSink::new(config.analysis.top_n))
            .with_selection(config.selection());

        if config.persistence.json_enabled || config.persistence.csv_enabled {
            pipeline = pipeline.with_sink(FileSink::from_config(&config.persistence)?);
        }
        Ok(pipeline)
    }

    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn with_selection(mut self, selection: Option<Vec<SourceId>>) -> Self {
        self.selection = selection;
        self
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Run one cycle and publish its report. Only an invalid source
    /// selection fails the cycle.
    pub async fn run_once(&self) -> Result<Report, ConfigError> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", cycle_id = %cycle_id);

        async {
            let outcomes = self.orchestrator.run(self.selection.as_deref()).await?;
            let report = self.analyzer.analyze_cycle(cycle_id, outcomes, Utc::now());

            info!(
                quotes = report.quote_count(),
                failures = report.failure_count(),
                opportunities = report.opportunities.len(),
                "cycle analysed"
            );

            for sink in &self.sinks {
                if let Err(e) = sink.publish(&report).await {
                    warn!(sink = sink.name(), error = %e, "sink failed");
                }
            }
            Ok::<_, ConfigError>(report)
        }
        .instrument(span)
        .await
    }
}
