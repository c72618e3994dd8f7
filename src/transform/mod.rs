//! Transform module - pure table transformations of harvested records.
//!
//! - **Traits**: [`TransformStage`] for composable stages
//! - **Stages**: [`Clean`], [`Split`], [`GeoEnrich`], [`BusinessEnrich`], [`Merge`]
//! - **Pipeline**: sequential executor via [`TransformPipeline`]

pub mod clean;
pub mod enrich;
pub mod fields;
pub mod geo;
pub mod merge;
pub mod pipeline;
pub mod split;
pub mod traits;

// Re-export commonly used types
pub use clean::Clean;
pub use enrich::{age_bucket, age_in_years, BusinessEnrich};
pub use fields::FIELD_MAP_VERSION;
pub use geo::{extract_departement, GeoEnrich, LambertConformalConic};
pub use merge::Merge;
pub use pipeline::{TransformPipeline, TransformResult, TransformStats};
pub use split::{Split, SplitTables};
pub use traits::{TransformError, TransformStage};
