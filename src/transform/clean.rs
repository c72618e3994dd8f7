//! Flattens raw establishment records into one active-establishment table.

use crate::model::RawRecord;
use crate::table::{cell_text, Table};
use crate::transform::fields::{
    self, ACTIVE_STATE, CATEGORIE_JURIDIQUE, CATEGORIE_JURIDIQUE_NIV2, DATE_CREATION_ETAB,
    DATE_CREATION_UL, ESTABLISHMENT_FIELDS, NB_ETABLISSEMENTS, PERIODS_PATH, PERIOD_FIELDS,
    PERIOD_START, PERIOD_STATE, SIREN, SIRET, USEFUL_COLUMNS,
};
use crate::transform::traits::{TransformError, TransformStage};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

/// Key columns survive the all-null column drop so that an empty input still
/// yields tables with their grain columns.
const KEY_COLUMNS: &[&str] = &[SIRET, SIREN];

#[derive(Debug, Clone, Copy, Default)]
pub struct Clean;

impl TransformStage for Clean {
    type Input = Vec<RawRecord>;
    type Output = Table;
    type Error = TransformError;

    fn execute(&self, records: Vec<RawRecord>) -> Result<Table, TransformError> {
        let mut table = Table::new(fields::columns_of(ESTABLISHMENT_FIELDS));
        let mut periods = Vec::with_capacity(records.len());
        for record in &records {
            table.push_row(fields::flatten(record, ESTABLISHMENT_FIELDS));
            periods.push(latest_period(record));
        }

        let empty: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| !KEY_COLUMNS.contains(&c.as_str()))
            .filter(|c| {
                table
                    .column_values(c)
                    .is_some_and(|mut values| values.all(Value::is_null))
            })
            .cloned()
            .collect();
        let dropped = table.drop_columns_where(|c| empty.iter().any(|e| e == c));
        if !dropped.is_empty() {
            debug!(columns = ?dropped, "Dropped empty columns");
        }

        table.derive_column(CATEGORIE_JURIDIQUE, CATEGORIE_JURIDIQUE_NIV2, |v| {
            cell_text(v).map_or(Value::Null, |s| Value::String(s.chars().take(2).collect()))
        });

        for (i, mapping) in PERIOD_FIELDS.iter().enumerate() {
            let values = periods
                .iter()
                .map(|p| p.as_ref().map_or(Value::Null, |row| row[i].clone()))
                .collect();
            table.set_column(mapping.column, values);
        }

        let mut table = table.select(USEFUL_COLUMNS);

        table.retain_rows(|row| row.text(PERIOD_STATE).as_deref() == Some(ACTIVE_STATE));
        table.retain_rows(|row| row.text(SIRET).is_some() && row.text(SIREN).is_some());
        let duplicates = table.dedup_by(SIRET)?;
        if duplicates > 0 {
            debug!(duplicates, "Dropped duplicate establishments");
        }

        for column in [DATE_CREATION_ETAB, DATE_CREATION_UL] {
            if table.has_column(column) {
                table.derive_column(column, column, parse_date_cell);
            }
        }

        let counts = table.count_by(SIREN)?;
        let siblings = table
            .rows()
            .map(|row| {
                row.text(SIREN)
                    .and_then(|siren| counts.get(&siren))
                    .map_or(Value::Null, |&n| Value::from(n as u64))
            })
            .collect();
        table.set_column(NB_ETABLISSEMENTS, siblings);

        debug!(
            input = records.len(),
            kept = table.len(),
            "Cleaned establishment records"
        );
        Ok(table)
    }

    fn stage_name(&self) -> &'static str {
        "clean"
    }
}

/// Flattened fields of the period with the greatest start date.
///
/// Start dates compare as ISO strings; a missing start date sorts last and
/// the first period wins a tie.
fn latest_period(record: &RawRecord) -> Option<Vec<Value>> {
    let periods = fields::lookup(record, PERIODS_PATH)?.as_array()?;
    let mut best: Option<(&Value, Option<&str>)> = None;
    for period in periods.iter().filter(|p| p.is_object()) {
        let start = period.get(PERIOD_START).and_then(Value::as_str);
        let better = match &best {
            None => true,
            Some((_, best_start)) => start > *best_start,
        };
        if better {
            best = Some((period, start));
        }
    }
    best.map(|(period, _)| fields::flatten(period, PERIOD_FIELDS))
}

/// Normalizes a date cell to `YYYY-MM-DD`; anything unparseable becomes null.
pub(crate) fn parse_date_cell(value: &Value) -> Value {
    cell_text(value)
        .and_then(|s| parse_date(&s))
        .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string()))
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}
