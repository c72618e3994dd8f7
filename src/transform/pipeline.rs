//! Sequential transformation pipeline.
//!
//! [`TransformPipeline`] runs Clean → Split → GeoEnrich → BusinessEnrich →
//! Merge over the raw records of one partition, timing and logging every
//! stage. It never performs I/O, so the same records and reference date
//! always produce the same tables.

use crate::model::RawRecord;
use crate::reference::ReferenceData;
use crate::traits::ProcessedTables;
use crate::transform::clean::Clean;
use crate::transform::enrich::BusinessEnrich;
use crate::transform::fields::LONGITUDE;
use crate::transform::geo::GeoEnrich;
use crate::transform::merge::Merge;
use crate::transform::split::{Split, SplitTables};
use crate::transform::traits::{TransformError, TransformStage};
use chrono::{Local, NaiveDate};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Tables produced by one pipeline run plus its statistics.
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub tables: ProcessedTables,
    pub stats: TransformStats,
}

/// Statistics about one transformation run.
#[derive(Debug, Default, Clone)]
pub struct TransformStats {
    /// Records handed to the pipeline
    pub raw_records: usize,

    /// Active, deduplicated establishments after cleaning
    pub clean_rows: usize,

    /// Establishments with usable WGS84 coordinates
    pub geocoded: usize,

    /// Wall time per stage, in execution order
    pub stage_durations: Vec<(&'static str, Duration)>,

    pub total_duration: Duration,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    clean: Clean,
    split: Split,
    geo: GeoEnrich,
    business: BusinessEnrich,
    merge: Merge,
}

impl TransformPipeline {
    /// Creates a pipeline whose ages are computed against today's local date.
    pub fn new(reference: ReferenceData) -> Self {
        Self {
            clean: Clean,
            split: Split,
            geo: GeoEnrich::new(),
            business: BusinessEnrich::new(reference, Local::now().date_naive()),
            merge: Merge,
        }
    }

    /// Pins the date ages are computed against.
    pub fn with_reference_date(mut self, as_of: NaiveDate) -> Self {
        self.business.set_reference_date(as_of);
        self
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.business.reference_date()
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when a stage cannot run; no partial tables
    /// are returned in that case.
    pub fn run(&self, records: Vec<RawRecord>) -> Result<TransformResult, TransformError> {
        let start = Instant::now();
        let mut stats = TransformStats {
            raw_records: records.len(),
            ..TransformStats::default()
        };

        info!(
            records = stats.raw_records,
            as_of = %self.reference_date(),
            "Starting transformation"
        );

        let clean = run_stage(&self.clean, records, &mut stats)?;
        stats.clean_rows = clean.len();

        let split = run_stage(&self.split, clean, &mut stats)?;

        let establishments = run_stage(&self.geo, split.establishments, &mut stats)?;
        stats.geocoded = establishments
            .column_values(LONGITUDE)
            .map_or(0, |values| values.filter(|v| !v.is_null()).count());
        let split = SplitTables {
            establishments,
            legal_units: split.legal_units,
        };

        let enriched = run_stage(&self.business, split, &mut stats)?;
        let tables = run_stage(&self.merge, enriched, &mut stats)?;

        stats.total_duration = start.elapsed();
        info!(
            establishments = tables.establishments.len(),
            legal_units = tables.legal_units.len(),
            merged = tables.merged.len(),
            geocoded = stats.geocoded,
            duration_ms = stats.total_duration.as_millis() as u64,
            "Transformation completed"
        );

        Ok(TransformResult { tables, stats })
    }
}

fn run_stage<S>(
    stage: &S,
    input: S::Input,
    stats: &mut TransformStats,
) -> Result<S::Output, TransformError>
where
    S: TransformStage,
    S::Error: Into<TransformError>,
{
    debug!(stage = stage.stage_name(), "Starting stage");
    let start = Instant::now();
    let output = stage.execute(input).map_err(Into::into)?;
    let elapsed = start.elapsed();
    stats.stage_durations.push((stage.stage_name(), elapsed));
    info!(
        stage = stage.stage_name(),
        duration_ms = elapsed.as_millis() as u64,
        "Stage completed"
    );
    Ok(output)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_establishment, raw_establishment};
    use crate::transform::fields::{
        DEPARTEMENT, LATITUDE, NB_ETABLISSEMENTS, SIREN, TRANCHE_ANCIENNETE_ETAB,
        TYPE_ACTIVITE_ETAB,
    };
    use serde_json::{json, Value};
    use std::collections::HashSet;

    fn pipeline() -> TransformPipeline {
        TransformPipeline::new(ReferenceData::default())
            .with_reference_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn records() -> Vec<RawRecord> {
        let mut no_coordinates = raw_establishment("55555555500013", "555555555");
        no_coordinates["adresseEtablissement"]["coordonneeLambertAbscisseEtablissement"] =
            json!("[ND]");
        vec![
            raw_establishment("12345678900011", "123456789"),
            raw_establishment("12345678900029", "123456789"),
            closed_establishment("12345678900037", "123456789"),
            raw_establishment("98765432100015", "987654321"),
            no_coordinates,
        ]
    }

    #[test]
    fn test_merged_row_count_matches_establishments() {
        let result = pipeline().run(records()).unwrap();
        let tables = &result.tables;
        assert_eq!(tables.establishments.len(), 4);
        assert_eq!(tables.merged.len(), tables.establishments.len());
        assert_eq!(tables.legal_units.len(), 3);

        let sirens: HashSet<_> = tables
            .legal_units
            .rows()
            .filter_map(|r| r.text(SIREN))
            .collect();
        assert_eq!(sirens.len(), tables.legal_units.len());
    }

    #[test]
    fn test_full_row_content() {
        let result = pipeline().run(records()).unwrap();
        let row = result.tables.merged.row(0).unwrap();

        assert_eq!(row.text(DEPARTEMENT).as_deref(), Some("75"));
        assert_eq!(row.text(TYPE_ACTIVITE_ETAB).as_deref(), Some("BTP"));
        // Created 2015-03-01, 3380 days before the reference date
        assert_eq!(row.text(TRANCHE_ANCIENNETE_ETAB).as_deref(), Some("6-10 ans"));
        assert_eq!(row.get(NB_ETABLISSEMENTS), Some(&json!(2)));
        assert!(row.get(LONGITUDE).and_then(Value::as_f64).is_some());
        assert!(!result
            .tables
            .merged
            .columns()
            .iter()
            .any(|c| c.ends_with("_siren_dup")));

        let last = result.tables.merged.row(3).unwrap();
        assert_eq!(last.get(LONGITUDE), Some(&Value::Null));
        assert_eq!(last.get(LATITUDE), Some(&Value::Null));
    }

    #[test]
    fn test_transformation_is_idempotent() {
        let pipeline = pipeline();
        let first = pipeline.run(records()).unwrap().tables;
        let second = pipeline.run(records()).unwrap().tables;
        for kind in crate::model::TableKind::ALL {
            assert_eq!(
                serde_json::to_vec(first.get(kind)).unwrap(),
                serde_json::to_vec(second.get(kind)).unwrap()
            );
        }
    }

    #[test]
    fn test_stats_cover_every_stage() {
        let result = pipeline().run(records()).unwrap();
        let names: Vec<_> = result.stats.stage_durations.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["clean", "split", "geo_enrich", "business_enrich", "merge"]
        );
        assert_eq!(result.stats.raw_records, 5);
        assert_eq!(result.stats.clean_rows, 4);
        assert_eq!(result.stats.geocoded, 3);
    }

    #[test]
    fn test_empty_input_gives_empty_tables() {
        let result = pipeline().run(Vec::new()).unwrap();
        assert!(result.tables.establishments.is_empty());
        assert!(result.tables.legal_units.is_empty());
        assert!(result.tables.merged.is_empty());
    }
}
