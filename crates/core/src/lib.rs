pub mod browse;
pub mod config;
pub mod device;
pub mod doctor;
pub mod error;
pub mod hasher;
pub mod index;
pub mod model;
pub mod redundancy;
pub mod scan;
pub mod store;

pub use browse::browse_directory;
pub use config::{EngineConfig, SafetyPolicy, ScanConfig};
pub use device::{
    DerivedVolumeIdentity, DeviceRegistry, DiskProbe, DiskSource, PlatformVolumeIdentity,
    SysinfoDiskSource, VolumeIdentity,
};
pub use doctor::{collect_doctor_info, DoctorInfo};
pub use error::{EngineError, Result};
pub use hasher::{Fingerprint, FINGERPRINT_HEX_LEN};
pub use index::{LocationIndex, LocationRecord, Upserted};
pub use model::{
    DashboardStats, DetectionFailure, DetectionReport, Device, DeviceType, DirEntry,
    FileLocation, FileSafety, ScanEvent, ScanMode, ScanState, ScanSummary, WasteCandidate,
    SCHEMA_VERSION,
};
pub use redundancy::RedundancyAnalyzer;
pub use scan::{ScanEngine, ScanHandle, ScanRequest};
pub use store::Store;
