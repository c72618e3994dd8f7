//! End-to-end orchestration: extraction, transformation, persistence, report.

use crate::config::HarvesterConfig;
use crate::harvest::{BatchCoordinator, Decision, ExtractionReport};
use crate::model::{Dataset, ExtractionStatus, RawRecord};
use crate::traits::{CatalogClient, MetadataStore, PartitionStore, StoreError};
use crate::transform::{TransformError, TransformPipeline, TransformResult};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Errors
// ============================================================================

/// Reasons a single partition fails to process.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No records available for partition {0}")]
    NoRecords(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transformation error: {0}")]
    Transform(#[from] TransformError),
}

// ============================================================================
// Run Types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Re-extract even fresh partitions
    pub force: bool,
    /// Transform whatever raw data is already stored
    pub skip_extraction: bool,
    /// Overrides the configured staleness threshold for this run
    pub max_age_days: Option<i64>,
}

/// Outcome of processing one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionResult {
    pub partition: String,
    pub success: bool,
    pub error: Option<String>,
    pub establishments: usize,
    pub legal_units: usize,
    pub merged: usize,
    pub duration: Duration,
}

impl PartitionResult {
    fn failed(partition: &str, error: String, duration: Duration) -> Self {
        Self {
            partition: partition.to_string(),
            success: false,
            error: Some(error),
            establishments: 0,
            legal_units: 0,
            merged: 0,
            duration,
        }
    }
}

/// Row totals across successful partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowTotals {
    pub establishments: usize,
    pub legal_units: usize,
    pub merged: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<PartitionResult>,
    pub success_count: usize,
    pub error_count: usize,
    pub totals: RowTotals,
    pub duration: Duration,
    /// Phase 1 report; `None` when extraction was skipped
    pub extraction: Option<ExtractionReport>,
    /// Written run report; `None` if it could not be written
    pub report_path: Option<PathBuf>,
}

impl RunSummary {
    fn from_results(
        results: Vec<PartitionResult>,
        extraction: Option<ExtractionReport>,
        duration: Duration,
    ) -> Self {
        let mut totals = RowTotals::default();
        for result in results.iter().filter(|r| r.success) {
            totals.establishments += result.establishments;
            totals.legal_units += result.legal_units;
            totals.merged += result.merged;
        }
        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            error_count: results.len() - success_count,
            success_count,
            totals,
            duration,
            extraction,
            report_path: None,
            results,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PipelineOrchestrator<C, S> {
    coordinator: BatchCoordinator<C, S>,
    pipeline: Arc<TransformPipeline>,
    store: Arc<S>,
    max_age_days: i64,
    report_dir: PathBuf,
}

impl<C, S> PipelineOrchestrator<C, S>
where
    C: CatalogClient,
    S: PartitionStore + MetadataStore,
{
    pub fn new(client: C, store: Arc<S>, config: &HarvesterConfig) -> Self {
        Self {
            coordinator: BatchCoordinator::new(client, store.clone(), config.api.clone()),
            pipeline: Arc::new(TransformPipeline::new(config.reference.clone())),
            store,
            max_age_days: config.staleness.max_age_days,
            report_dir: config.storage.report_dir.clone(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn coordinator(&self) -> &BatchCoordinator<C, S> {
        &self.coordinator
    }

    /// Runs the whole chain for one partition.
    ///
    /// Unless `skip_extraction` is set, the partition is harvested first when
    /// the staleness policy asks for it. Any failure is captured in the
    /// returned result and nothing is persisted for that partition.
    #[instrument(skip(self))]
    pub async fn process_partition(
        &self,
        partition: &str,
        skip_extraction: bool,
    ) -> PartitionResult {
        let start = Instant::now();
        match self.try_process(partition, skip_extraction).await {
            Ok(result) => {
                let duration = start.elapsed();
                info!(
                    establishments = result.tables.establishments.len(),
                    legal_units = result.tables.legal_units.len(),
                    merged = result.tables.merged.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Partition processed"
                );
                PartitionResult {
                    partition: partition.to_string(),
                    success: true,
                    error: None,
                    establishments: result.tables.establishments.len(),
                    legal_units: result.tables.legal_units.len(),
                    merged: result.tables.merged.len(),
                    duration,
                }
            }
            Err(e) => {
                error!(error = %e, "Partition failed");
                PartitionResult::failed(partition, e.to_string(), start.elapsed())
            }
        }
    }

    async fn try_process(
        &self,
        partition: &str,
        skip_extraction: bool,
    ) -> Result<TransformResult, PipelineError> {
        let harvested = if skip_extraction {
            None
        } else {
            self.extract_if_needed(partition).await?
        };
        let records = match harvested {
            Some(records) => records,
            None => self.load_stored(partition)?,
        };
        if records.is_empty() {
            return Err(PipelineError::NoRecords(partition.to_string()));
        }

        let pipeline = Arc::clone(&self.pipeline);
        let result = tokio::task::spawn_blocking(move || pipeline.run(records))
            .await
            .map_err(|e| TransformError::StageFailed {
                stage: "transform",
                message: format!("Task join error: {e}"),
            })??;

        self.store.save_tables(partition, &result.tables)?;
        Ok(result)
    }

    /// Harvests the partition when the staleness policy asks for it and
    /// returns the harvested records, partial or not. `None` means the stored
    /// data is fresh.
    async fn extract_if_needed(
        &self,
        partition: &str,
    ) -> Result<Option<Vec<RawRecord>>, PipelineError> {
        let decision = self
            .coordinator
            .policy()
            .decide(partition, self.max_age_days, false)?;
        if let Decision::Skip { age_days } = decision {
            info!(age_days, "Stored data is fresh, extraction skipped");
            return Ok(None);
        }

        let outcome = self.coordinator.extractor().harvest(partition).await?;
        if outcome.records.is_empty() {
            return Err(PipelineError::NoRecords(partition.to_string()));
        }
        if !outcome.is_complete() {
            warn!(
                records = outcome.records.len(),
                "Extraction is partial, transforming the records harvested so far"
            );
        }
        Ok(Some(outcome.records))
    }

    /// Most recent harvest in storage: the checkpoint of a run that ended
    /// `partial`, otherwise the completed raw dataset.
    fn load_stored(&self, partition: &str) -> Result<Vec<RawRecord>, PipelineError> {
        let partial = self
            .store
            .load_metadata(partition)?
            .is_some_and(|meta| meta.status == ExtractionStatus::Partial);
        let dataset = if partial && self.store.exists(partition, Dataset::Checkpoint)? {
            info!("Using checkpoint of the last partial extraction");
            Dataset::Checkpoint
        } else {
            Dataset::Raw
        };

        match self.store.load_records(partition, dataset) {
            Ok(records) => Ok(records),
            Err(StoreError::NotFound { .. }) => {
                Err(PipelineError::NoRecords(partition.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Phase 1 extracts every partition that needs it, phase 2 transforms
    /// every partition from stored raw data. A report file is written in the
    /// report directory at the end.
    pub async fn run_batch(&self, partitions: &[String], options: &RunOptions) -> RunSummary {
        let start = Instant::now();
        let max_age_days = options.max_age_days.unwrap_or(self.max_age_days);
        info!(
            partitions = partitions.len(),
            max_age_days,
            force = options.force,
            skip_extraction = options.skip_extraction,
            "Starting pipeline run"
        );

        let extraction = if options.skip_extraction {
            info!("Phase 1 skipped");
            None
        } else {
            info!("Phase 1: extraction");
            Some(
                self.coordinator
                    .run(partitions, max_age_days, options.force)
                    .await,
            )
        };

        info!("Phase 2: transformation");
        let mut results = Vec::with_capacity(partitions.len());
        for (i, partition) in partitions.iter().enumerate() {
            info!(
                partition = %partition,
                index = i + 1,
                total = partitions.len(),
                "Processing partition"
            );
            results.push(self.process_partition(partition, true).await);
        }

        let mut summary = RunSummary::from_results(results, extraction, start.elapsed());
        info!(
            success = summary.success_count,
            errors = summary.error_count,
            establishments = summary.totals.establishments,
            legal_units = summary.totals.legal_units,
            duration_ms = summary.duration.as_millis() as u64,
            "Pipeline run finished"
        );

        match write_report(&self.report_dir, &summary, Local::now()).await {
            Ok(path) => {
                info!(path = %path.display(), "Report written");
                summary.report_path = Some(path);
            }
            Err(e) => warn!(error = %e, "Failed to write run report"),
        }
        summary
    }
}

// ============================================================================
// Report
// ============================================================================

pub fn report_file_name(at: DateTime<Local>) -> String {
    format!("pipeline_report_{}.txt", at.format("%Y%m%d_%H%M%S"))
}

pub fn render_report(summary: &RunSummary, at: DateTime<Local>) -> String {
    let total = summary.results.len();
    let mut out = String::new();
    let _ = writeln!(out, "PIPELINE REPORT");
    let _ = writeln!(out, "Date: {}", at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Duration: {:.1}s", summary.duration.as_secs_f64());
    let _ = writeln!(out);
    let _ = writeln!(out, "Success: {}/{}", summary.success_count, total);
    let _ = writeln!(out, "Errors: {}/{}", summary.error_count, total);
    let _ = writeln!(out, "Total establishments: {}", summary.totals.establishments);
    let _ = writeln!(out, "Total legal units: {}", summary.totals.legal_units);
    let _ = writeln!(out, "Total merged rows: {}", summary.totals.merged);

    if let Some(extraction) = &summary.extraction {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Extraction: {} extracted, {} updated, {} skipped, {} failed",
            extraction.success.len(),
            extraction.updated.len(),
            extraction.skipped.len(),
            extraction.errors.len()
        );
        for failure in &extraction.errors {
            let _ = writeln!(out, "   {} : {}", failure.partition, failure.error);
        }
    }

    let _ = writeln!(out);
    for result in &summary.results {
        let status = if result.success { "OK " } else { "ERR" };
        let _ = writeln!(
            out,
            "[{status}] {} : {} SIRET, {} SIREN, {} FULL ({:.1}s)",
            result.partition,
            result.establishments,
            result.legal_units,
            result.merged,
            result.duration.as_secs_f64()
        );
        if let Some(error) = &result.error {
            let _ = writeln!(out, "   Error: {error}");
        }
    }
    out
}

async fn write_report(
    dir: &Path,
    summary: &RunSummary,
    at: DateTime<Local>,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(report_file_name(at));
    tokio::fs::write(&path, render_report(summary, at)).await?;
    Ok(path)
}

// ============================================================================
// Tests
// ============================================================================
