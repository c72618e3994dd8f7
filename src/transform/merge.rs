use crate::traits::ProcessedTables;
use crate::transform::fields::SIREN;
use crate::transform::split::SplitTables;
use crate::transform::traits::{TransformError, TransformStage};
use tracing::debug;

/// Suffix given to legal-unit columns that collide with establishment ones.
pub const DUPLICATE_SUFFIX: &str = "_siren_dup";

/// Left join of establishments with their legal unit.
///
/// Colliding legal-unit columns are suffixed and then discarded, so the
/// establishment value always wins. An establishment column that already
/// ends with the suffix would be discarded too.
#[derive(Debug, Clone, Copy, Default)]
pub struct Merge;

impl TransformStage for Merge {
    type Input = SplitTables;
    type Output = ProcessedTables;
    type Error = TransformError;

    fn execute(&self, tables: SplitTables) -> Result<ProcessedTables, TransformError> {
        let mut merged = tables
            .establishments
            .left_join(&tables.legal_units, SIREN, DUPLICATE_SUFFIX)?;
        let dropped = merged.drop_columns_where(|c| c.ends_with(DUPLICATE_SUFFIX));
        debug!(
            rows = merged.len(),
            columns = merged.columns().len(),
            dropped = dropped.len(),
            "Merged establishments with legal units"
        );

        Ok(ProcessedTables {
            establishments: tables.establishments,
            legal_units: tables.legal_units,
            merged,
        })
    }

    fn stage_name(&self) -> &'static str {
        "merge"
    }
}
