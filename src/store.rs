//! Filesystem and in-memory implementations of the storage traits.
//!
//! Layout under the data root:
//!
//! ```text
//! raw/raw_entreprises_{partition}.json
//! checkpoints/checkpoint_{partition}.json
//! final/{siret,siren,full}_{partition}.json
//! metadata/{partition}.meta.json
//! ```
//!
//! Partition ids are embedded in file names and must match `[A-Za-z0-9._-]+`.

use crate::model::{Dataset, ExtractionMetadata};
use crate::traits::{MetadataStore, PartitionStore, StoreError};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

// ============================================================================
// Filesystem
// ============================================================================

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_path(&self, partition: &str, dataset: Dataset) -> Result<PathBuf, StoreError> {
        validate_partition(partition)?;
        let path = match dataset {
            Dataset::Raw => self
                .root
                .join("raw")
                .join(format!("raw_entreprises_{partition}.json")),
            Dataset::Checkpoint => self
                .root
                .join("checkpoints")
                .join(format!("checkpoint_{partition}.json")),
            Dataset::Table(kind) => self
                .root
                .join("final")
                .join(format!("{}_{partition}.json", kind.short_name())),
        };
        Ok(path)
    }

    pub fn metadata_path(&self, partition: &str) -> Result<PathBuf, StoreError> {
        validate_partition(partition)?;
        Ok(self
            .root
            .join("metadata")
            .join(format!("{partition}.meta.json")))
    }
}

/// Rejects ids that could leave the data root or clash with the layout.
pub fn validate_partition(partition: &str) -> Result<(), StoreError> {
    let valid = !partition.is_empty()
        && partition != "."
        && partition != ".."
        && partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPartition(partition.to_string()))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

fn write_staged(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = staging_path(path);
    std::fs::write(&tmp, bytes)?;
    Ok(tmp)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = write_staged(path, bytes)?;
    std::fs::rename(&tmp, path)
}

impl PartitionStore for FsStore {
    fn exists(&self, partition: &str, dataset: Dataset) -> Result<bool, StoreError> {
        Ok(self.dataset_path(partition, dataset)?.try_exists()?)
    }

    fn read(&self, partition: &str, dataset: Dataset) -> Result<Vec<u8>, StoreError> {
        let path = self.dataset_path(partition, dataset)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                partition: partition.to_string(),
                dataset: dataset.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, partition: &str, dataset: Dataset, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.dataset_path(partition, dataset)?;
        atomic_write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Dataset written");
        Ok(())
    }

    /// Stages every file, then renames them into place.
    ///
    /// A failure while staging leaves the previous set untouched. A failure
    /// during the renames can leave a mix of new and old files; the staged
    /// files not yet renamed are removed in both cases.
    fn write_all(&self, partition: &str, items: &[(Dataset, Vec<u8>)]) -> Result<(), StoreError> {
        let paths = items
            .iter()
            .map(|(dataset, _)| self.dataset_path(partition, *dataset))
            .collect::<Result<Vec<_>, _>>()?;
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(items.len());
        for (path, (_, bytes)) in paths.into_iter().zip(items) {
            match write_staged(&path, bytes) {
                Ok(tmp) => staged.push((tmp, path)),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = std::fs::remove_file(tmp);
                    }
                    return Err(e.into());
                }
            }
        }
        for (i, (tmp, path)) in staged.iter().enumerate() {
            if let Err(e) = std::fs::rename(tmp, path) {
                for (leftover, _) in &staged[i..] {
                    let _ = std::fs::remove_file(leftover);
                }
                return Err(e.into());
            }
        }
        debug!(partition, datasets = items.len(), "Dataset set committed");
        Ok(())
    }

    fn delete(&self, partition: &str, dataset: Dataset) -> Result<(), StoreError> {
        match std::fs::remove_file(self.dataset_path(partition, dataset)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl MetadataStore for FsStore {
    fn load_metadata(&self, partition: &str) -> Result<Option<ExtractionMetadata>, StoreError> {
        let path = self.metadata_path(partition)?;
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                // An unreadable sidecar is treated like a missing one so the
                // partition gets re-extracted.
                warn!(partition, error = %e, "Ignoring corrupt metadata sidecar");
                Ok(None)
            }
        }
    }

    fn save_metadata(&self, metadata: &ExtractionMetadata) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&self.metadata_path(&metadata.partition)?, &json)?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Store kept entirely in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: Mutex<HashMap<(String, Dataset), Vec<u8>>>,
    metadata: Mutex<HashMap<String, ExtractionMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Io(io::Error::other("store lock poisoned"))
}

impl PartitionStore for MemoryStore {
    fn exists(&self, partition: &str, dataset: Dataset) -> Result<bool, StoreError> {
        let datasets = self.datasets.lock().map_err(poisoned)?;
        Ok(datasets.contains_key(&(partition.to_string(), dataset)))
    }

    fn read(&self, partition: &str, dataset: Dataset) -> Result<Vec<u8>, StoreError> {
        let datasets = self.datasets.lock().map_err(poisoned)?;
        datasets
            .get(&(partition.to_string(), dataset))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                partition: partition.to_string(),
                dataset: dataset.to_string(),
            })
    }

    fn write(&self, partition: &str, dataset: Dataset, bytes: &[u8]) -> Result<(), StoreError> {
        let mut datasets = self.datasets.lock().map_err(poisoned)?;
        datasets.insert((partition.to_string(), dataset), bytes.to_vec());
        Ok(())
    }

    fn write_all(&self, partition: &str, items: &[(Dataset, Vec<u8>)]) -> Result<(), StoreError> {
        let mut datasets = self.datasets.lock().map_err(poisoned)?;
        for (dataset, bytes) in items {
            datasets.insert((partition.to_string(), *dataset), bytes.clone());
        }
        Ok(())
    }

    fn delete(&self, partition: &str, dataset: Dataset) -> Result<(), StoreError> {
        let mut datasets = self.datasets.lock().map_err(poisoned)?;
        datasets.remove(&(partition.to_string(), dataset));
        Ok(())
    }
}

impl MetadataStore for MemoryStore {
    fn load_metadata(&self, partition: &str) -> Result<Option<ExtractionMetadata>, StoreError> {
        let metadata = self.metadata.lock().map_err(poisoned)?;
        Ok(metadata.get(partition).cloned())
    }

    fn save_metadata(&self, metadata: &ExtractionMetadata) -> Result<(), StoreError> {
        let mut all = self.metadata.lock().map_err(poisoned)?;
        all.insert(metadata.partition.clone(), metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractionStatus, TableKind};
    use crate::table::Table;
    use crate::traits::ProcessedTables;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_fs_records_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let records = vec![json!({"siret": "1"}), json!({"siret": "2"})];

        assert!(!store.exists("43.22A", Dataset::Checkpoint).unwrap());
        store
            .save_records("43.22A", Dataset::Checkpoint, &records)
            .unwrap();
        assert!(store.exists("43.22A", Dataset::Checkpoint).unwrap());
        assert_eq!(
            store.load_records("43.22A", Dataset::Checkpoint).unwrap(),
            records
        );

        store.delete("43.22A", Dataset::Checkpoint).unwrap();
        store.delete("43.22A", Dataset::Checkpoint).unwrap();
        assert!(!store.exists("43.22A", Dataset::Checkpoint).unwrap());
    }

    #[test]
    fn test_fs_read_missing_dataset() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.read("41.10A", Dataset::Raw).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_fs_layout() {
        let store = FsStore::new("/data");
        assert_eq!(
            store.dataset_path("43.22A", Dataset::Raw).unwrap(),
            PathBuf::from("/data/raw/raw_entreprises_43.22A.json")
        );
        assert_eq!(
            store
                .dataset_path("43.22A", Dataset::Table(TableKind::LegalUnits))
                .unwrap(),
            PathBuf::from("/data/final/siren_43.22A.json")
        );
    }

    #[test]
    fn test_fs_tables_written_as_set() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let tables = ProcessedTables {
            establishments: Table::new(vec!["siret".into()]),
            legal_units: Table::new(vec!["siren".into()]),
            merged: Table::new(vec!["siret".into(), "siren".into()]),
        };

        store.save_tables("43.22A", &tables).unwrap();
        for kind in TableKind::ALL {
            assert_eq!(&store.load_table("43.22A", kind).unwrap(), tables.get(kind));
        }
        // No staging files left behind
        assert_eq!(staged_files(&dir.path().join("final")), 0);
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().is_some_and(|x| x == "tmp"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn test_fs_failed_commit_removes_staged_files() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        // A directory in place of the legal-unit file makes its rename fail
        let blocker = store
            .dataset_path("43.22A", Dataset::Table(TableKind::LegalUnits))
            .unwrap();
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();
        let tables = ProcessedTables {
            establishments: Table::new(vec!["siret".into()]),
            legal_units: Table::new(vec!["siren".into()]),
            merged: Table::new(vec!["siret".into(), "siren".into()]),
        };

        assert!(store.save_tables("43.22A", &tables).is_err());
        assert_eq!(staged_files(&dir.path().join("final")), 0);
    }

    #[test]
    fn test_fs_rejects_partition_ids_outside_root() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().join("data"));
        for bad in ["../escape", "a/b", "..", "", "43.22A\\x"] {
            assert!(matches!(
                store.write(bad, Dataset::Raw, b"[]"),
                Err(StoreError::InvalidPartition(_))
            ));
            assert!(matches!(
                store.load_metadata(bad),
                Err(StoreError::InvalidPartition(_))
            ));
        }
        assert!(!dir.path().join("escape").exists());
        assert!(validate_partition("43.22A").is_ok());
        assert!(validate_partition("F_01-x").is_ok());
    }

    #[test]
    fn test_fs_metadata_roundtrip_and_corrupt_sidecar() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.load_metadata("43.22A").unwrap().is_none());

        let meta = ExtractionMetadata::completed("43.22A", 12);
        store.save_metadata(&meta).unwrap();
        let loaded = store.load_metadata("43.22A").unwrap().unwrap();
        assert_eq!(loaded.status, ExtractionStatus::Completed);
        assert_eq!(loaded.record_count, 12);

        std::fs::write(store.metadata_path("43.22A").unwrap(), b"{not json").unwrap();
        assert!(store.load_metadata("43.22A").unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.write("p", Dataset::Raw, b"[]").unwrap();
        assert!(store.exists("p", Dataset::Raw).unwrap());
        assert!(!store.exists("q", Dataset::Raw).unwrap());
        assert!(store.load_records("p", Dataset::Raw).unwrap().is_empty());
        store.delete("p", Dataset::Raw).unwrap();
        assert!(store.read("p", Dataset::Raw).is_err());
    }
}
