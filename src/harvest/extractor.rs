//! Cursor-paginated extraction of one partition.
//!
//! Pagination always starts from [`SENTINEL_CURSOR`]. Checkpoints written
//! every `checkpoint_every` pages hold the records gathered so far but not the
//! cursor, so they cannot resume a run: a restarted harvest starts over and
//! the checkpoint only documents what the interrupted run had collected.

use crate::config::ApiConfig;
use crate::model::{Dataset, ExtractionMetadata, ExtractionStatus, RawRecord};
use crate::traits::{
    CatalogClient, FetchError, MetadataStore, PartitionStore, StoreError, SENTINEL_CURSOR,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Result of one harvest attempt.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub partition: String,
    pub records: Vec<RawRecord>,
    /// `Partial` when the run stopped on a non-retryable request failure
    pub status: ExtractionStatus,
    pub pages: usize,
    pub duration: Duration,
    /// Why a partial run stopped
    pub failure: Option<String>,
}

impl HarvestOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == ExtractionStatus::Completed
    }
}

pub struct Extractor<C, S> {
    client: C,
    store: Arc<S>,
    config: ApiConfig,
}

impl<C, S> Extractor<C, S>
where
    C: CatalogClient,
    S: PartitionStore + MetadataStore,
{
    pub fn new(client: C, store: Arc<S>, config: ApiConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Harvests every establishment of `partition`.
    ///
    /// Rate-limit and timeout responses are retried on the same cursor after a
    /// fixed delay. Any other request failure stops the run: the records
    /// gathered so far are saved as a checkpoint, metadata is marked
    /// `partial`, and the partial set is returned as `Ok`.
    ///
    /// # Errors
    ///
    /// Only storage failures are returned as errors.
    #[instrument(skip(self))]
    pub async fn harvest(&self, partition: &str) -> Result<HarvestOutcome, StoreError> {
        let start = Instant::now();
        let mut records: Vec<RawRecord> = Vec::new();
        let mut cursor = SENTINEL_CURSOR.to_string();
        let mut pages = 0usize;
        let mut retries = 0u32;

        info!(page_size = self.config.page_size, "Starting extraction");

        loop {
            let page = match self
                .client
                .fetch_page(partition, &cursor, self.config.page_size)
                .await
            {
                Ok(page) => {
                    retries = 0;
                    page
                }
                Err(err) => {
                    let delay = match err {
                        FetchError::RateLimited => Some(self.config.rate_limit_delay()),
                        FetchError::Timeout => Some(self.config.timeout_delay()),
                        FetchError::Request(_) => None,
                    };
                    match delay {
                        Some(delay) if retries < self.config.max_retries => {
                            retries += 1;
                            warn!(
                                error = %err,
                                retry = retries,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying page"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        _ => {
                            let outcome = HarvestOutcome {
                                partition: partition.to_string(),
                                records,
                                status: ExtractionStatus::Partial,
                                pages,
                                duration: start.elapsed(),
                                failure: Some(err.to_string()),
                            };
                            return self.abandon(outcome);
                        }
                    }
                }
            };

            pages += 1;
            if page.records.is_empty() {
                info!(pages, "Empty page, end of results");
                break;
            }
            records.extend(page.records);

            if self.config.checkpoint_every > 0 && pages % self.config.checkpoint_every == 0 {
                self.checkpoint(partition, &records)?;
            }

            let current = page.header.cursor.unwrap_or_else(|| cursor.clone());
            match page.header.next_cursor {
                Some(next) if next != current => cursor = next,
                _ => {
                    info!(pages, records = records.len(), "Cursor exhausted");
                    break;
                }
            }

            if !self.config.page_delay().is_zero() {
                tokio::time::sleep(self.config.page_delay()).await;
            }
        }

        self.store.save_records(partition, Dataset::Raw, &records)?;
        self.store
            .save_metadata(&ExtractionMetadata::completed(partition, records.len()))?;
        self.store.delete(partition, Dataset::Checkpoint)?;

        let duration = start.elapsed();
        info!(
            pages,
            records = records.len(),
            duration_ms = duration.as_millis() as u64,
            "Extraction completed"
        );

        Ok(HarvestOutcome {
            partition: partition.to_string(),
            records,
            status: ExtractionStatus::Completed,
            pages,
            duration,
            failure: None,
        })
    }

    fn checkpoint(&self, partition: &str, records: &[RawRecord]) -> Result<(), StoreError> {
        self.store
            .save_records(partition, Dataset::Checkpoint, records)?;
        self.store
            .save_metadata(&ExtractionMetadata::partial(partition, records.len()))?;
        info!(records = records.len(), "Checkpoint saved");
        Ok(())
    }

    fn abandon(&self, outcome: HarvestOutcome) -> Result<HarvestOutcome, StoreError> {
        warn!(
            pages = outcome.pages,
            records = outcome.records.len(),
            error = outcome.failure.as_deref().unwrap_or_default(),
            "Extraction stopped early, keeping partial data"
        );
        self.checkpoint(&outcome.partition, &outcome.records)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{page, ScriptedClient};
    use serde_json::json;

    fn fast_config() -> ApiConfig {
        ApiConfig {
            page_delay_ms: 0,
            rate_limit_delay_ms: 0,
            timeout_delay_ms: 0,
            max_retries: 3,
            ..ApiConfig::default()
        }
    }

    fn records(prefix: &str, n: usize) -> Vec<RawRecord> {
        (0..n).map(|i| json!({ "siret": format!("{prefix}{i}") })).collect()
    }

    #[tokio::test]
    async fn test_stops_when_next_cursor_repeats() {
        let client = ScriptedClient::new().with_pages(
            "43.22A",
            vec![
                page("*", "c1", records("a", 3)),
                page("c1", "c2", records("b", 3)),
                page("c2", "c3", records("c", 3)),
                page("c3", "c3", records("d", 2)),
                page("c3", "c3", records("never", 1)),
            ],
        );
        let store = Arc::new(MemoryStore::new());
        let extractor = Extractor::new(client, store.clone(), fast_config());

        let outcome = extractor.harvest("43.22A").await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 11);
        assert_eq!(outcome.pages, 4);
        assert_eq!(
            extractor.client().cursors("43.22A"),
            vec!["*", "c1", "c2", "c3"]
        );

        let raw = store.load_records("43.22A", Dataset::Raw).unwrap();
        assert_eq!(raw, outcome.records);
        let meta = store.load_metadata("43.22A").unwrap().unwrap();
        assert_eq!(meta.status, ExtractionStatus::Completed);
        assert_eq!(meta.record_count, 11);
        assert!(!store.exists("43.22A", Dataset::Checkpoint).unwrap());
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let client = ScriptedClient::new().with_pages(
            "41.10A",
            vec![
                page("*", "c1", records("a", 2)),
                page("c1", "c2", vec![]),
            ],
        );
        let store = Arc::new(MemoryStore::new());
        let extractor = Extractor::new(client, store.clone(), fast_config());

        let outcome = extractor.harvest("41.10A").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(extractor.client().cursors("41.10A").len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_and_timeout_retry_same_cursor() {
        let client = ScriptedClient::new();
        client.push("43.11Z", Ok(page("*", "c1", records("a", 1))));
        client.push("43.11Z", Err(FetchError::RateLimited));
        client.push("43.11Z", Err(FetchError::Timeout));
        client.push("43.11Z", Ok(page("c1", "c1", records("b", 1))));
        let store = Arc::new(MemoryStore::new());
        let extractor = Extractor::new(client, store.clone(), fast_config());

        let outcome = extractor.harvest("43.11Z").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            extractor.client().cursors("43.11Z"),
            vec!["*", "c1", "c1", "c1"]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_keeps_partial_records() {
        let client = ScriptedClient::new();
        client.push("43.99A", Ok(page("*", "c1", records("a", 2))));
        client.push("43.99A", Ok(page("c1", "c2", records("b", 2))));
        client.push("43.99A", Err(FetchError::Request("HTTP 500".into())));
        let store = Arc::new(MemoryStore::new());
        let extractor = Extractor::new(client, store.clone(), fast_config());

        let outcome = extractor.harvest("43.99A").await.unwrap();

        assert_eq!(outcome.status, ExtractionStatus::Partial);
        assert_eq!(outcome.records.len(), 4);
        assert!(outcome.failure.unwrap().contains("HTTP 500"));
        let checkpoint = store.load_records("43.99A", Dataset::Checkpoint).unwrap();
        assert_eq!(checkpoint.len(), 4);
        let meta = store.load_metadata("43.99A").unwrap().unwrap();
        assert_eq!(meta.status, ExtractionStatus::Partial);
        assert_eq!(meta.record_count, 4);
        assert!(!store.exists("43.99A", Dataset::Raw).unwrap());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_counts_as_failure() {
        let client = ScriptedClient::new();
        client.push("43.12A", Ok(page("*", "c1", records("a", 1))));
        for _ in 0..4 {
            client.push("43.12A", Err(FetchError::RateLimited));
        }
        let store = Arc::new(MemoryStore::new());
        let extractor = Extractor::new(client, store.clone(), fast_config());

        let outcome = extractor.harvest("43.12A").await.unwrap();
        assert_eq!(outcome.status, ExtractionStatus::Partial);
        // first page + initial attempt + 3 retries
        assert_eq!(extractor.client().cursors("43.12A").len(), 5);
        assert_eq!(store.load_records("43.12A", Dataset::Checkpoint).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_checkpoint_then_cleanup() {
        let store = Arc::new(MemoryStore::new());
        let observer = store.clone();
        let client = ScriptedClient::new()
            .with_pages(
                "43.21A",
                vec![
                    page("*", "c1", records("a", 2)),
                    page("c1", "c2", records("b", 2)),
                    page("c2", "c2", records("c", 2)),
                ],
            )
            .with_hook(move |partition, call| {
                if call == 3 {
                    // Two pages in: the checkpoint must already be on disk.
                    let meta = observer.load_metadata(partition).unwrap().unwrap();
                    assert_eq!(meta.status, ExtractionStatus::Partial);
                    assert_eq!(meta.record_count, 4);
                    assert!(observer.exists(partition, Dataset::Checkpoint).unwrap());
                }
            });
        let config = ApiConfig {
            checkpoint_every: 2,
            ..fast_config()
        };
        let extractor = Extractor::new(client, store.clone(), config);

        let outcome = extractor.harvest("43.21A").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 6);
        assert!(!store.exists("43.21A", Dataset::Checkpoint).unwrap());
        assert_eq!(
            store.load_metadata("43.21A").unwrap().unwrap().status,
            ExtractionStatus::Completed
        );
    }
}
