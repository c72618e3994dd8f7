use crate::config::ApiConfig;
use crate::harvest::extractor::Extractor;
use crate::harvest::staleness::{Decision, ExtractReason, StalenessPolicy};
use crate::traits::{CatalogClient, MetadataStore, PartitionStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFailure {
    pub partition: String,
    pub error: String,
}

/// Outcome of an extraction batch, grouped by result category.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Extracted for the first time (or after missing/partial state)
    pub success: Vec<String>,
    /// Re-extracted because the previous data was stale
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<PartitionFailure>,
    pub elapsed: Duration,
}

impl ExtractionReport {
    pub fn total(&self) -> usize {
        self.success.len() + self.updated.len() + self.skipped.len() + self.errors.len()
    }
}

/// Runs staleness checks and extraction across many partitions.
pub struct BatchCoordinator<C, S> {
    extractor: Extractor<C, S>,
    policy: StalenessPolicy<S>,
}

impl<C, S> BatchCoordinator<C, S>
where
    C: CatalogClient,
    S: PartitionStore + MetadataStore,
{
    pub fn new(client: C, store: Arc<S>, config: ApiConfig) -> Self {
        Self {
            extractor: Extractor::new(client, store.clone(), config),
            policy: StalenessPolicy::new(store),
        }
    }

    pub fn extractor(&self) -> &Extractor<C, S> {
        &self.extractor
    }

    pub fn policy(&self) -> &StalenessPolicy<S> {
        &self.policy
    }

    /// Processes `partitions` one after another. A failing partition is
    /// recorded in `errors` and never stops the batch.
    pub async fn run(
        &self,
        partitions: &[String],
        max_age_days: i64,
        force: bool,
    ) -> ExtractionReport {
        let start = Instant::now();
        let mut report = ExtractionReport::default();

        for (i, partition) in partitions.iter().enumerate() {
            info!(
                partition = %partition,
                index = i + 1,
                total = partitions.len(),
                "Checking partition"
            );

            let decision = match self.policy.decide(partition, max_age_days, force) {
                Ok(decision) => decision,
                Err(e) => {
                    error!(partition = %partition, error = %e, "Staleness check failed");
                    report.errors.push(PartitionFailure {
                        partition: partition.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let reason = match decision {
                Decision::Skip { age_days } => {
                    info!(partition = %partition, age_days, "Data is fresh, skipping");
                    report.skipped.push(partition.clone());
                    continue;
                }
                Decision::Extract(reason) => reason,
            };

            info!(partition = %partition, reason = reason.as_str(), "Extracting");
            match self.extractor.harvest(partition).await {
                Ok(outcome) if outcome.records.is_empty() => {
                    warn!(partition = %partition, "Extraction returned no records");
                    report.errors.push(PartitionFailure {
                        partition: partition.clone(),
                        error: outcome
                            .failure
                            .unwrap_or_else(|| "no records extracted".to_string()),
                    });
                }
                Ok(outcome) => {
                    if !outcome.is_complete() {
                        warn!(
                            partition = %partition,
                            records = outcome.records.len(),
                            "Extraction is partial; it will be retried next run"
                        );
                    }
                    if reason == ExtractReason::Stale {
                        report.updated.push(partition.clone());
                    } else {
                        report.success.push(partition.clone());
                    }
                }
                Err(e) => {
                    error!(partition = %partition, error = %e, "Extraction failed");
                    report.errors.push(PartitionFailure {
                        partition: partition.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            success = report.success.len(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Extraction batch finished"
        );
        report
    }
}
