//! Stage abstraction shared by every transformation step.

use crate::table::TableError;
use thiserror::Error;

// ============================================================================
// Stage Trait
// ============================================================================

/// A pure step of the transformation pipeline turning `Input` into `Output`.
///
/// Stages never touch storage or the network. Running a stage twice on the
/// same input yields the same output, which is what makes a whole pipeline
/// run safe to repeat.
///
/// # Examples
///
/// ```ignore
/// struct Uppercase;
///
/// impl TransformStage for Uppercase {
///     type Input = Table;
///     type Output = Table;
///     type Error = TransformError;
///
///     fn execute(&self, input: Table) -> Result<Table, TransformError> {
///         Ok(input.rename_columns(|c| c.to_uppercase()))
///     }
///
///     fn stage_name(&self) -> &'static str {
///         "uppercase"
///     }
/// }
/// ```
pub trait TransformStage: Send + Sync {
    /// Input type consumed by this stage
    type Input;

    /// Output type produced by this stage
    type Output;

    /// Error type for stage failures
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the stage.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the input lacks a column the stage cannot do
    /// without. Malformed cell values are nulled, not reported.
    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;

    /// Name used in logs and stage timings.
    fn stage_name(&self) -> &'static str;
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },
}
