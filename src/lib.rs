pub mod client;
pub mod config;
pub mod harvest;
pub mod model;
pub mod orchestrator;
pub mod reference;
pub mod sink;
pub mod store;
pub mod table;
pub mod telemetry;
pub mod traits;
pub mod transform;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use client::SireneClient;
pub use config::{load_config, ConfigError, HarvesterConfig};
pub use harvest::{BatchCoordinator, Extractor, StalenessPolicy};
pub use model::*;
pub use orchestrator::{PipelineError, PipelineOrchestrator, RunOptions, RunSummary};
pub use reference::ReferenceData;
pub use sink::{DirectorySink, SinkError, SinkOptions, TableSink, WriteMode};
pub use store::{FsStore, MemoryStore};
pub use table::Table;
pub use traits::*;
pub use transform::{TransformError, TransformPipeline};
