use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A partition is one APE activity code, e.g. `"43.22A"`.
pub type PartitionId = String;

/// Raw establishment record as returned by the upstream API.
pub type RawRecord = serde_json::Value;

/// Outcome state of the last extraction attempt for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Completed,
    Partial,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Completed => f.write_str("completed"),
            ExtractionStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Sidecar written after every extraction attempt. Overwritten each time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub partition: PartitionId,
    pub status: ExtractionStatus,
    pub timestamp: DateTime<Utc>,
    pub record_count: usize,
}

impl ExtractionMetadata {
    pub fn completed(partition: &str, record_count: usize) -> Self {
        Self {
            partition: partition.to_string(),
            status: ExtractionStatus::Completed,
            timestamp: Utc::now(),
            record_count,
        }
    }

    pub fn partial(partition: &str, record_count: usize) -> Self {
        Self {
            partition: partition.to_string(),
            status: ExtractionStatus::Partial,
            timestamp: Utc::now(),
            record_count,
        }
    }
}

/// The three processed tables produced per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableKind {
    /// Site grain, keyed by `siret`.
    Establishments,
    /// Legal-entity grain, keyed by `siren`.
    LegalUnits,
    /// Establishments left-joined with their legal unit.
    Merged,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [
        TableKind::Establishments,
        TableKind::LegalUnits,
        TableKind::Merged,
    ];

    /// Short name used in file names and warehouse table names.
    pub fn short_name(self) -> &'static str {
        match self {
            TableKind::Establishments => "siret",
            TableKind::LegalUnits => "siren",
            TableKind::Merged => "full",
        }
    }
}

/// Every dataset a partition can own in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dataset {
    Raw,
    Checkpoint,
    Table(TableKind),
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Raw => f.write_str("raw"),
            Dataset::Checkpoint => f.write_str("checkpoint"),
            Dataset::Table(kind) => f.write_str(kind.short_name()),
        }
    }
}
