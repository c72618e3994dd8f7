//! Handoff of processed tables to a warehouse.
//!
//! A sink accepts one table at a time. Column names are restricted to
//! `[A-Za-z0-9_]` before handoff, column types are either inferred from the
//! cells or given explicitly, and clustering hints are only passed for
//! columns the table actually has.

use crate::model::TableKind;
use crate::table::Table;
use crate::traits::{PartitionStore, StoreError};
use crate::transform::fields::{CATEGORIE_EFFECTIFS_ETAB, DEPARTEMENT, TYPE_ACTIVITE_ETAB};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

// ============================================================================
// Contract
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the table contents
    #[default]
    Truncate,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SchemaMode {
    #[default]
    Inferred,
    Explicit(Vec<ColumnSpec>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOptions {
    pub write_mode: WriteMode,
    pub schema: SchemaMode,
    pub clustering: Vec<String>,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid column name '{0}'")]
    InvalidColumnName(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Destination for processed tables.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Writes `table` under `name` and returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when column names are not sanitized, when an
    /// explicit schema does not match the table, or when the write fails.
    async fn write_table(
        &self,
        name: &str,
        table: &Table,
        options: &SinkOptions,
    ) -> Result<usize, SinkError>;
}

// ============================================================================
// Preparation
// ============================================================================

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_column_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn is_sanitized(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Copy of `table` with sink-safe column names.
pub fn prepare_table(table: &Table) -> Table {
    table.rename_columns(sanitize_column_name)
}

/// Warehouse table name, e.g. `siret_43_22A`.
pub fn warehouse_table_name(kind: TableKind, partition: &str) -> String {
    sanitize_column_name(&format!("{}_{}", kind.short_name(), partition))
}

pub fn default_clustering(kind: TableKind) -> Vec<String> {
    let columns: &[&str] = match kind {
        TableKind::Establishments => &[DEPARTEMENT, TYPE_ACTIVITE_ETAB],
        TableKind::LegalUnits => &[],
        TableKind::Merged => &[DEPARTEMENT, TYPE_ACTIVITE_ETAB, CATEGORIE_EFFECTIFS_ETAB],
    };
    columns.iter().map(|c| c.to_string()).collect()
}

fn cell_type(value: &Value, allow_date: bool) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
        Value::Number(_) => Some(ColumnType::Float),
        Value::String(s)
            if allow_date && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() =>
        {
            Some(ColumnType::Date)
        }
        _ => Some(ColumnType::String),
    }
}

/// Infers one type per column from its non-null cells.
///
/// Integers mixed with floats widen to `Float`; any other mix, and a column
/// with no value at all, is `String`. Only columns whose name mentions a date
/// can be typed `Date`.
pub fn infer_schema(table: &Table) -> Vec<ColumnSpec> {
    table
        .columns()
        .iter()
        .map(|name| {
            let allow_date = name.to_lowercase().contains("date");
            let mut inferred: Option<ColumnType> = None;
            for value in table.column_values(name).into_iter().flatten() {
                let Some(t) = cell_type(value, allow_date) else {
                    continue;
                };
                inferred = Some(match (inferred, t) {
                    (None, t) => t,
                    (Some(a), b) if a == b => a,
                    (Some(ColumnType::Integer), ColumnType::Float)
                    | (Some(ColumnType::Float), ColumnType::Integer) => ColumnType::Float,
                    _ => ColumnType::String,
                });
            }
            ColumnSpec {
                name: name.clone(),
                column_type: inferred.unwrap_or(ColumnType::String),
            }
        })
        .collect()
}

/// Hands the three processed tables of `partition` to `sink`.
///
/// Returns `(table name, rows written)` per table.
#[instrument(skip(store, sink))]
pub async fn upload_partition<S, K>(
    store: &S,
    sink: &K,
    partition: &str,
    write_mode: WriteMode,
) -> Result<Vec<(String, usize)>, SinkError>
where
    S: PartitionStore + ?Sized,
    K: TableSink + ?Sized,
{
    let mut written = Vec::with_capacity(TableKind::ALL.len());
    for kind in TableKind::ALL {
        let table = prepare_table(&store.load_table(partition, kind)?);
        let clustering = default_clustering(kind)
            .into_iter()
            .filter(|c| table.has_column(c))
            .collect();
        let options = SinkOptions {
            write_mode,
            schema: SchemaMode::Inferred,
            clustering,
        };
        let name = warehouse_table_name(kind, partition);
        let rows = sink.write_table(&name, &table, &options).await?;
        info!(table = %name, rows, "Table handed to sink");
        written.push((name, rows));
    }
    Ok(written)
}

// ============================================================================
// Directory Sink
// ============================================================================

#[derive(Serialize)]
struct TableManifest<'a> {
    columns: &'a [ColumnSpec],
    clustering: &'a [String],
}

/// Sink writing newline-delimited JSON plus a schema manifest per table.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.ndjson"))
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.schema.json"))
    }
}

fn check_schema(table: &Table, specs: &[ColumnSpec]) -> Result<(), SinkError> {
    let declared: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    let actual: HashSet<&str> = table.columns().iter().map(String::as_str).collect();
    if let Some(missing) = table.columns().iter().find(|c| !declared.contains(c.as_str())) {
        return Err(SinkError::SchemaMismatch(format!(
            "column '{missing}' is not declared"
        )));
    }
    if let Some(extra) = specs.iter().find(|s| !actual.contains(s.name.as_str())) {
        return Err(SinkError::SchemaMismatch(format!(
            "declared column '{}' is absent",
            extra.name
        )));
    }
    Ok(())
}

fn to_ndjson(table: &Table) -> Result<Vec<u8>, SinkError> {
    let mut out = Vec::new();
    for row in table.rows() {
        let object: Map<String, Value> = table
            .columns()
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect();
        serde_json::to_writer(&mut out, &object)?;
        out.push(b'\n');
    }
    Ok(out)
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[async_trait]
impl TableSink for DirectorySink {
    async fn write_table(
        &self,
        name: &str,
        table: &Table,
        options: &SinkOptions,
    ) -> Result<usize, SinkError> {
        if let Some(bad) = table.columns().iter().find(|c| !is_sanitized(c)) {
            return Err(SinkError::InvalidColumnName(bad.clone()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = table.columns().iter().find(|c| !seen.insert(c.as_str())) {
            return Err(SinkError::SchemaMismatch(format!(
                "column '{dup}' appears twice"
            )));
        }

        let specs = match &options.schema {
            SchemaMode::Inferred => infer_schema(table),
            SchemaMode::Explicit(specs) => {
                check_schema(table, specs)?;
                specs.clone()
            }
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let data = to_ndjson(table)?;
        match options.write_mode {
            WriteMode::Truncate => tokio::fs::write(self.data_path(name), &data).await?,
            WriteMode::Append => append(&self.data_path(name), &data).await?,
        }

        let manifest = serde_json::to_vec_pretty(&TableManifest {
            columns: &specs,
            clustering: &options.clustering,
        })?;
        tokio::fs::write(self.manifest_path(name), manifest).await?;

        Ok(table.len())
    }
}
