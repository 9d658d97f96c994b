use std::env;

use serde::{Deserialize, Serialize};

use crate::device::DeviceRegistry;
use crate::error::Result;
use crate::model::{DetectionFailure, Device, DeviceType};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub catalog_path: Option<String>,
    pub schema_version: i64,
    pub registered_devices: usize,
    pub attached: Vec<Device>,
    pub detection_failures: Vec<DetectionFailure>,
    pub notes: Vec<String>,
}

/// Runs a detection pass and reports what the host and catalog look like.
pub fn collect_doctor_info(store: &Store, registry: &DeviceRegistry) -> Result<DoctorInfo> {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());
    let report = registry.detect()?;
    let registered = registry.list()?;

    let mut notes = vec![
        "Scans only read files; the catalog is the only thing written.".to_string(),
        "Index rows are never pruned unless a scan runs with reconcile enabled.".to_string(),
    ];
    if report.devices.is_empty() {
        notes.push(
            "No attached devices detected; register a mount with `devices register`.".to_string(),
        );
    }
    let unclassified = registered
        .iter()
        .filter(|device| device.device_type == DeviceType::Unknown)
        .count();
    if unclassified > 0 {
        notes.push(format!(
            "{unclassified} device(s) are unclassified and count toward neither hot nor cold copies."
        ));
    }
    if store.path().is_none() {
        notes.push("Catalog is in memory; nothing persists after exit.".to_string());
    }

    Ok(DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        catalog_path: store.path().map(|path| path.to_string_lossy().to_string()),
        schema_version: store.schema_version()?,
        registered_devices: registered.len(),
        attached: report.devices,
        detection_failures: report.failures,
        notes,
    })
}
