//! Harvester configuration.
//!
//! Uses `figment` for layering: built-in defaults, then an optional TOML
//! file, then `HARVESTER_`-prefixed environment variables
//! (`HARVESTER_API__API_KEY`, `HARVESTER_STALENESS__MAX_AGE_DAYS`, ...).

use crate::reference::ReferenceData;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub staleness: StalenessConfig,
    pub reference: ReferenceData,
}

/// Upstream API access and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Integration key sent with every request
    pub api_key: String,
    pub page_size: usize,
    /// Persist a checkpoint every N pages
    pub checkpoint_every: usize,
    /// Pause between two successful page requests
    pub page_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub timeout_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Consecutive retries of one cursor before giving up
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.insee.fr/api-sirene/3.11/siret".to_string(),
            api_key: String::new(),
            page_size: 1000,
            checkpoint_every: 50,
            page_delay_ms: 300,
            rate_limit_delay_ms: 5_000,
            timeout_delay_ms: 1_000,
            request_timeout_secs: 60,
            max_retries: 10,
        }
    }
}

impl ApiConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn timeout_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            report_dir: PathBuf::from("data/final"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub max_age_days: i64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}

/// Loads configuration from defaults, an optional TOML file and the environment.
///
/// A missing file is skipped rather than reported.
pub fn load_config(file: Option<&Path>) -> Result<HarvesterConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(HarvesterConfig::default()));
    if let Some(path) = file {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }
    figment = figment.merge(Env::prefixed("HARVESTER_").split("__"));
    figment.extract().map_err(|e| ConfigError::Invalid(Box::new(e)))
}
