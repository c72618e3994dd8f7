use crate::table::Table;
use crate::transform::fields::{ESTABLISHMENT_COLUMNS, LEGAL_UNIT_COLUMNS, SIREN};
use crate::transform::traits::{TransformError, TransformStage};
use tracing::debug;

/// Establishment and legal-unit projections of one cleaned table.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTables {
    /// One row per `siret`
    pub establishments: Table,
    /// One row per `siren`
    pub legal_units: Table,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Split;

impl TransformStage for Split {
    type Input = Table;
    type Output = SplitTables;
    type Error = TransformError;

    fn execute(&self, clean: Table) -> Result<SplitTables, TransformError> {
        let establishments = clean.select(ESTABLISHMENT_COLUMNS);
        let mut legal_units = clean.select(LEGAL_UNIT_COLUMNS);
        let repeated = legal_units.dedup_by(SIREN)?;

        debug!(
            establishments = establishments.len(),
            legal_units = legal_units.len(),
            repeated,
            "Split cleaned table"
        );
        Ok(SplitTables {
            establishments,
            legal_units,
        })
    }

    fn stage_name(&self) -> &'static str {
        "split"
    }
}
