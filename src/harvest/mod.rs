//! Harvest module - cursor-paginated extraction and freshness decisions.
//!
//! - **Extraction**: [`Extractor`] pages through one partition with retries
//!   and checkpoints
//! - **Staleness**: [`StalenessPolicy`] decides whether stored data is fresh
//! - **Batch**: [`BatchCoordinator`] runs both across many partitions

pub mod batch;
pub mod extractor;
pub mod staleness;

// Re-export commonly used types
pub use batch::{BatchCoordinator, ExtractionReport, PartitionFailure};
pub use extractor::{Extractor, HarvestOutcome};
pub use staleness::{Decision, ExtractReason, StalenessPolicy};
