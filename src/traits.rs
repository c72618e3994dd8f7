use crate::model::{Dataset, ExtractionMetadata, RawRecord, TableKind};
use crate::table::Table;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Upstream catalog
// ============================================================================

/// Cursor value that starts a fresh pagination.
pub const SENTINEL_CURSOR: &str = "*";

/// One page of the upstream catalog.
///
/// Field names follow the SIRENE wire format; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "etablissements", default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub header: PageHeader,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageHeader {
    #[serde(rename = "curseur", default)]
    pub cursor: Option<String>,
    #[serde(rename = "curseurSuivant", default)]
    pub next_cursor: Option<String>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    /// Upstream asked us to slow down
    #[error("Rate limited by upstream API")]
    RateLimited,
    /// Request did not complete in time; safe to retry
    #[error("Request timed out")]
    Timeout,
    /// Anything else: bad status, connection refused, undecodable body
    #[error("Request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches the page at `cursor` for the establishments of `partition`.
    async fn fetch_page(
        &self,
        partition: &str,
        cursor: &str,
        page_size: usize,
    ) -> Result<Page, FetchError>;
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Dataset '{dataset}' not found for partition {partition}")]
    NotFound { partition: String, dataset: String },
    #[error("Invalid partition id '{0}'")]
    InvalidPartition(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The three processed tables of a partition, persisted as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTables {
    pub establishments: Table,
    pub legal_units: Table,
    pub merged: Table,
}

impl ProcessedTables {
    pub fn get(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::Establishments => &self.establishments,
            TableKind::LegalUnits => &self.legal_units,
            TableKind::Merged => &self.merged,
        }
    }
}

/// Durable byte storage for partition datasets.
///
/// Implementations only move bytes; the provided methods handle encoding.
pub trait PartitionStore: Send + Sync {
    fn exists(&self, partition: &str, dataset: Dataset) -> Result<bool, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the dataset was never written.
    fn read(&self, partition: &str, dataset: Dataset) -> Result<Vec<u8>, StoreError>;

    fn write(&self, partition: &str, dataset: Dataset, bytes: &[u8]) -> Result<(), StoreError>;

    /// Writes several datasets so that either all of them land or none do.
    fn write_all(&self, partition: &str, items: &[(Dataset, Vec<u8>)]) -> Result<(), StoreError>;

    /// Deleting a dataset that does not exist is not an error.
    fn delete(&self, partition: &str, dataset: Dataset) -> Result<(), StoreError>;

    fn load_records(&self, partition: &str, dataset: Dataset) -> Result<Vec<RawRecord>, StoreError> {
        let bytes = self.read(partition, dataset)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_records(
        &self,
        partition: &str,
        dataset: Dataset,
        records: &[RawRecord],
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(records)?;
        self.write(partition, dataset, &bytes)
    }

    fn load_table(&self, partition: &str, kind: TableKind) -> Result<Table, StoreError> {
        let bytes = self.read(partition, Dataset::Table(kind))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_tables(&self, partition: &str, tables: &ProcessedTables) -> Result<(), StoreError> {
        let items = TableKind::ALL
            .iter()
            .map(|&kind| Ok((Dataset::Table(kind), serde_json::to_vec(tables.get(kind))?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.write_all(partition, &items)
    }
}

/// Per-partition extraction status sidecar.
pub trait MetadataStore: Send + Sync {
    fn load_metadata(&self, partition: &str) -> Result<Option<ExtractionMetadata>, StoreError>;

    fn save_metadata(&self, metadata: &ExtractionMetadata) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_ignores_unknown_fields() {
        let body = r#"{
            "header": {"statut": 200, "curseur": "*", "curseurSuivant": "AoE", "total": 3},
            "etablissements": [{"siret": "1", "brandNewField": true}],
            "somethingElse": {}
        }"#;
        let page: Page = serde_json::from_str(body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.header.cursor.as_deref(), Some("*"));
        assert_eq!(page.header.next_cursor.as_deref(), Some("AoE"));
    }

    #[test]
    fn test_page_without_records() {
        let page: Page = serde_json::from_str(r#"{"header": {}}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(page.header.next_cursor.is_none());
    }
}
