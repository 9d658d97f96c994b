use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub mount_point: String,
    pub device_type: DeviceType,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub is_removable: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Hot,
    Cold,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Hot => "hot",
            DeviceType::Cold => "cold",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hot" => Ok(DeviceType::Hot),
            "cold" => Ok(DeviceType::Cold),
            "unknown" => Ok(DeviceType::Unknown),
            other => Err(format!("unknown device type '{other}'")),
        }
    }
}

/// What a fingerprint was computed over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Size, mtime and a bounded leading sample.
    Quick,
    /// The entire file content.
    #[default]
    Full,
}

impl ScanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Full => "full",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "quick" => Ok(ScanMode::Quick),
            "full" => Ok(ScanMode::Full),
            other => Err(format!("unknown scan mode '{other}'")),
        }
    }
}

/// One observed occurrence of a fingerprint at a path on a device.
///
/// `file_path` is relative to the device mount point and always uses `/`
/// separators, so rows survive the device being mounted somewhere else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileLocation {
    pub id: i64,
    pub content_hash: String,
    pub device_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub last_verified: DateTime<Utc>,
    pub scan_mode: ScanMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSafety {
    pub content_hash: String,
    pub file_size: u64,
    pub representative_name: String,
    pub total_copies: u64,
    pub hot_copies: u64,
    pub cold_copies: u64,
    pub is_safe: bool,
    /// Every location was fingerprinted over its full content.
    pub fully_verified: bool,
    pub locations: Vec<FileLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WasteCandidate {
    pub content_hash: String,
    pub file_size: u64,
    pub representative_name: String,
    pub total_copies: u64,
    pub wasted_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DashboardStats {
    pub total_files: u64,
    pub total_locations: u64,
    pub unsafe_files: u64,
    pub total_devices: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        total_files: u64,
    },
    Progress {
        scanned: u64,
        total: u64,
    },
    FileHashed {
        path: String,
        hash: String,
    },
    Error {
        message: String,
    },
    Finished {
        scanned: u64,
        hashed: u64,
        added: u64,
        removed: u64,
    },
    Cancelled {
        scanned: u64,
        total: u64,
    },
    Failed {
        reason: String,
    },
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Finished { .. } | ScanEvent::Cancelled { .. } | ScanEvent::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Finished,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub scan_id: String,
    pub state: ScanState,
    pub total: u64,
    pub scanned: u64,
    pub hashed: u64,
    pub added: u64,
    pub removed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    pub devices: Vec<Device>,
    pub failures: Vec<DetectionFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionFailure {
    pub source: String,
    pub mount_point: Option<String>,
    pub reason: String,
}
