use crate::model::{Dataset, ExtractionStatus};
use crate::traits::{MetadataStore, PartitionStore, StoreError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Why a partition needs to be (re-)extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractReason {
    Forced,
    /// No harvested raw dataset in storage
    Missing,
    MissingMetadata,
    /// Last attempt ended `partial`
    Incomplete,
    Stale,
}

impl ExtractReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractReason::Forced => "forced",
            ExtractReason::Missing => "missing",
            ExtractReason::MissingMetadata => "missing-metadata",
            ExtractReason::Incomplete => "incomplete",
            ExtractReason::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Extract(ExtractReason),
    /// Completed extraction younger than the age threshold
    Skip { age_days: i64 },
}

impl Decision {
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Extract(reason) => reason.as_str(),
            Decision::Skip { .. } => "fresh",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Extract(reason) => write!(f, "EXTRACT({})", reason.as_str()),
            Decision::Skip { .. } => f.write_str("SKIP(fresh)"),
        }
    }
}

pub struct StalenessPolicy<S> {
    store: Arc<S>,
}

impl<S> StalenessPolicy<S>
where
    S: PartitionStore + MetadataStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn decide(
        &self,
        partition: &str,
        max_age_days: i64,
        force: bool,
    ) -> Result<Decision, StoreError> {
        self.decide_at(partition, max_age_days, force, Utc::now())
    }

    /// Rules are checked in order; the first match wins. Age is counted in
    /// whole days.
    pub fn decide_at(
        &self,
        partition: &str,
        max_age_days: i64,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        if force {
            return Ok(Decision::Extract(ExtractReason::Forced));
        }
        if !self.store.exists(partition, Dataset::Raw)? {
            return Ok(Decision::Extract(ExtractReason::Missing));
        }
        let Some(metadata) = self.store.load_metadata(partition)? else {
            return Ok(Decision::Extract(ExtractReason::MissingMetadata));
        };
        if metadata.status == ExtractionStatus::Partial {
            return Ok(Decision::Extract(ExtractReason::Incomplete));
        }
        let age_days = (now - metadata.timestamp).num_days();
        if age_days > max_age_days {
            return Ok(Decision::Extract(ExtractReason::Stale));
        }
        Ok(Decision::Skip { age_days })
    }
}
