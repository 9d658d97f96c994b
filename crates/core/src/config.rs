use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub safety: SafetyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan: ScanConfig::default(),
            safety: SafetyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Leading bytes read for a quick fingerprint.
    #[serde(default = "default_quick_sample_bytes")]
    pub quick_sample_bytes: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_progress_every_files")]
    pub progress_every_files: u64,
    /// Capacity of the event channel handed to the caller.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Capacity of the stat -> hash stage channel.
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    #[serde(default = "default_commit_batch")]
    pub commit_batch: usize,
    /// Delete index rows for paths that vanished under the target.
    #[serde(default)]
    pub reconcile: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            quick_sample_bytes: default_quick_sample_bytes(),
            progress_interval_ms: default_progress_interval_ms(),
            progress_every_files: default_progress_every_files(),
            event_buffer: default_event_buffer(),
            pipeline_depth: default_pipeline_depth(),
            commit_batch: default_commit_batch(),
            reconcile: false,
            excludes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SafetyPolicy {
    /// Quick-mode matches do not count toward safety when set.
    #[serde(default)]
    pub require_full_verification: bool,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("copy-ledger.db")
}

fn default_quick_sample_bytes() -> u64 {
    64 * 1024
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_progress_every_files() -> u64 {
    64
}

fn default_event_buffer() -> usize {
    256
}

fn default_pipeline_depth() -> usize {
    128
}

fn default_commit_batch() -> usize {
    256
}

impl EngineConfig {
    /// Reads a TOML config file, or returns defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|err| {
                    EngineError::Config(format!("failed to read {}: {err}", path.display()))
                })?;
                debug!("loaded engine config from {}", path.display());
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| EngineError::Config(err.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let scan = &self.scan;
        if scan.quick_sample_bytes == 0 {
            return Err(EngineError::Config(
                "scan.quick_sample_bytes must be greater than zero".to_string(),
            ));
        }
        if scan.progress_interval_ms == 0 {
            return Err(EngineError::Config(
                "scan.progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if scan.progress_every_files == 0 {
            return Err(EngineError::Config(
                "scan.progress_every_files must be greater than zero".to_string(),
            ));
        }
        if scan.event_buffer == 0 || scan.pipeline_depth == 0 || scan.commit_batch == 0 {
            return Err(EngineError::Config(
                "scan.event_buffer, scan.pipeline_depth and scan.commit_batch must be non-zero"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
