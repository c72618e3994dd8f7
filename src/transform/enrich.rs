//! Business attributes derived from reference data and a reference date.

use crate::reference::ReferenceData;
use crate::table::{cell_text, Table};
use crate::transform::clean::parse_date;
use crate::transform::fields::{
    ANCIENNETE_ETAB, ANCIENNETE_UL, CATEGORIE_EFFECTIFS_ETAB, CATEGORIE_EFFECTIFS_UL,
    DATE_CREATION_ETAB, DATE_CREATION_UL, DIVISION_APE_ETAB, PERIOD_ACTIVITY,
    TRANCHE_ANCIENNETE_ETAB, TRANCHE_ANCIENNETE_UL, TRANCHE_EFFECTIFS_ETAB,
    TRANCHE_EFFECTIFS_UL, TYPE_ACTIVITE_ETAB,
};
use crate::transform::split::SplitTables;
use crate::transform::traits::{TransformError, TransformStage};
use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

const DAYS_PER_YEAR: i64 = 365;

/// Whole years between `created` and `as_of`, counted as 365-day blocks.
pub fn age_in_years(created: NaiveDate, as_of: NaiveDate) -> i64 {
    (as_of - created).num_days().div_euclid(DAYS_PER_YEAR)
}

/// Seniority bucket label; bounds are inclusive.
pub fn age_bucket(years: i64) -> &'static str {
    match years {
        i64::MIN..=5 => "0-5 ans",
        6..=10 => "6-10 ans",
        11..=20 => "11-20 ans",
        _ => "20+ ans",
    }
}

#[derive(Debug, Clone)]
pub struct BusinessEnrich {
    reference: ReferenceData,
    as_of: NaiveDate,
}

impl BusinessEnrich {
    pub fn new(reference: ReferenceData, as_of: NaiveDate) -> Self {
        Self { reference, as_of }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.as_of
    }

    pub fn set_reference_date(&mut self, as_of: NaiveDate) {
        self.as_of = as_of;
    }

    fn add_age(&self, table: &mut Table, date_column: &str, age_column: &str, bucket_column: &str) {
        let as_of = self.as_of;
        table.derive_column(date_column, age_column, |v| {
            cell_text(v)
                .and_then(|s| parse_date(&s))
                .map_or(Value::Null, |d| Value::from(age_in_years(d, as_of)))
        });
        table.derive_column(age_column, bucket_column, |v| {
            v.as_i64()
                .map_or(Value::Null, |years| Value::String(age_bucket(years).to_string()))
        });
    }

    fn add_headcount(&self, table: &mut Table, code_column: &str, category_column: &str) {
        table.derive_column(code_column, category_column, |v| {
            cell_text(v)
                .and_then(|code| self.reference.headcount_category(&code).map(str::to_string))
                .map_or(Value::Null, Value::String)
        });
    }

    fn enrich_establishments(&self, table: &mut Table) {
        self.add_age(table, DATE_CREATION_ETAB, ANCIENNETE_ETAB, TRANCHE_ANCIENNETE_ETAB);
        self.add_headcount(table, TRANCHE_EFFECTIFS_ETAB, CATEGORIE_EFFECTIFS_ETAB);

        table.derive_column(PERIOD_ACTIVITY, DIVISION_APE_ETAB, |v| {
            cell_text(v).map_or(Value::Null, |code| Value::String(code.chars().take(2).collect()))
        });
        // A missing activity code is classified as outside the target sector.
        table.derive_column(PERIOD_ACTIVITY, TYPE_ACTIVITE_ETAB, |v| {
            let label = match cell_text(v) {
                Some(code) if self.reference.is_target_sector(&code) => {
                    &self.reference.target_sector_label
                }
                _ => &self.reference.other_sector_label,
            };
            Value::String(label.clone())
        });
    }

    fn enrich_legal_units(&self, table: &mut Table) {
        self.add_age(table, DATE_CREATION_UL, ANCIENNETE_UL, TRANCHE_ANCIENNETE_UL);
        self.add_headcount(table, TRANCHE_EFFECTIFS_UL, CATEGORIE_EFFECTIFS_UL);
    }
}

impl TransformStage for BusinessEnrich {
    type Input = SplitTables;
    type Output = SplitTables;
    type Error = TransformError;

    fn execute(&self, mut tables: SplitTables) -> Result<SplitTables, TransformError> {
        self.enrich_establishments(&mut tables.establishments);
        self.enrich_legal_units(&mut tables.legal_units);
        debug!(as_of = %self.as_of, "Business enrichment done");
        Ok(tables)
    }

    fn stage_name(&self) -> &'static str {
        "business_enrich"
    }
}
