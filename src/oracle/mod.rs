//! Oracle module - gold price collection
//!
//! Sources (one adapter per retail gold site) and the orchestrator that runs
//! them concurrently under a cycle deadline.

pub mod orchestrator;
pub mod sources;

pub use orchestrator::{run_sources, Orchestrator, OrchestratorConfig};
pub use sources::{builtin_adapters, RegisteredSource, SourceAdapter, SourceRegistry};
