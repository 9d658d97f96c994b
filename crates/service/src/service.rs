use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use copy_ledger_core::{
    browse_directory, collect_doctor_info, DashboardStats, DetectionReport, Device, DeviceRegistry,
    DeviceType, DirEntry, DiskSource, DoctorInfo, EngineConfig, FileLocation,
    FileSafety, LocationIndex, RedundancyAnalyzer, ScanEngine, ScanHandle, ScanMode, ScanRequest,
    ScanState, Store, VolumeIdentity, WasteCandidate,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Scan parameters as they arrive from a presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartScan {
    pub target: PathBuf,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub reconcile: Option<bool>,
}

impl From<StartScan> for ScanRequest {
    fn from(value: StartScan) -> Self {
        ScanRequest {
            target: value.target,
            mode: value.mode,
            excludes: value.excludes,
            reconcile: value.reconcile,
        }
    }
}

/// Device registry, location index, scanner and analyzer over one catalog.
pub struct Engine {
    config: EngineConfig,
    store: Arc<Store>,
    registry: Arc<DeviceRegistry>,
    index: Arc<LocationIndex>,
    analyzer: RedundancyAnalyzer,
    scans: ScanEngine,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Store::open(&config.database_path).with_context(|| {
            format!("failed to open catalog {}", config.database_path.display())
        })?;
        let store = Arc::new(store);
        let registry = DeviceRegistry::new(Arc::clone(&store))?;
        Ok(Self::assemble(config, store, registry))
    }

    /// An engine over an in-memory catalog, probing disks with `sources`.
    pub fn in_memory(
        config: EngineConfig,
        sources: Vec<Box<dyn DiskSource>>,
        identity: Box<dyn VolumeIdentity>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::open_in_memory()?);
        let registry = DeviceRegistry::with_probes(Arc::clone(&store), sources, identity)?;
        Ok(Self::assemble(config, store, registry))
    }

    fn assemble(config: EngineConfig, store: Arc<Store>, registry: DeviceRegistry) -> Self {
        let registry = Arc::new(registry);
        let index = Arc::new(LocationIndex::new(Arc::clone(&store)));
        let analyzer = RedundancyAnalyzer::new(Arc::clone(&store), config.safety.clone());
        let scans = ScanEngine::new(
            Arc::clone(&registry),
            Arc::clone(&index),
            config.scan.clone(),
        );
        Self {
            config,
            store,
            registry,
            index,
            analyzer,
            scans,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detect_devices(&self) -> Result<DetectionReport> {
        Ok(self.registry.detect()?)
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.registry.list()?)
    }

    pub fn set_device_type(&self, device_id: &str, device_type: DeviceType) -> Result<Device> {
        self.registry
            .set_device_type(device_id, device_type)
            .with_context(|| format!("failed to classify device {device_id}"))
    }

    /// Registers `mount` as a device when detection does not report it. A
    /// folder that is not itself a disk mount gets a path-derived id.
    pub fn register_device(&self, mount: &Path, label: Option<String>) -> Result<Device> {
        let mount = mount
            .canonicalize()
            .with_context(|| format!("mount point {} is not accessible", mount.display()))?;
        if !mount.is_dir() {
            return Err(anyhow!("mount point {} is not a directory", mount.display()));
        }
        let device = self.registry.register_mount(&mount, label)?;
        info!("registered device {} at {}", device.id, device.mount_point);
        Ok(device)
    }

    pub fn start_scan(&self, request: impl Into<ScanRequest>) -> Result<ScanHandle> {
        let request = request.into();
        let target = request.target.clone();
        self.scans
            .start(request)
            .with_context(|| format!("failed to start scan of {}", target.display()))
    }

    /// No-op when nothing is running.
    pub fn cancel_scan(&self) -> Result<bool> {
        Ok(self.scans.cancel()?)
    }

    pub fn scan_state(&self) -> Result<ScanState> {
        Ok(self.scans.state()?)
    }

    pub fn files_on_device(&self, device_id: &str) -> Result<Vec<FileLocation>> {
        Ok(self.index.by_device(device_id)?)
    }

    pub fn file_locations(&self, content_hash: &str) -> Result<Vec<FileLocation>> {
        Ok(self.index.by_hash(content_hash)?)
    }

    pub fn file_safety(&self, content_hash: &str) -> Result<Option<FileSafety>> {
        Ok(self.analyzer.safety_of(content_hash)?)
    }

    pub fn unsafe_files(&self) -> Result<Vec<FileSafety>> {
        Ok(self.analyzer.unsafe_files()?)
    }

    pub fn waste_candidates(&self, threshold_bytes: Option<u64>) -> Result<Vec<WasteCandidate>> {
        Ok(self.analyzer.waste_candidates(threshold_bytes)?)
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        Ok(self.analyzer.dashboard_stats()?)
    }

    pub fn browse_directory(&self, path: &Path) -> Result<Vec<DirEntry>> {
        Ok(browse_directory(path)?)
    }

    pub fn doctor(&self) -> Result<DoctorInfo> {
        Ok(collect_doctor_info(&self.store, &self.registry)?)
    }
}

static ENGINE: OnceCell<Engine> = OnceCell::new();

/// Opens the process-wide engine. Later calls return the first engine and
/// ignore their config.
pub fn init_engine(config: EngineConfig) -> Result<&'static Engine> {
    if let Some(engine) = ENGINE.get() {
        debug!("engine already initialised; ignoring new config");
        return Ok(engine);
    }
    ENGINE.get_or_try_init(|| Engine::open(config))
}

pub fn engine() -> Result<&'static Engine> {
    ENGINE
        .get()
        .ok_or_else(|| anyhow!("engine not initialised; call init_engine first"))
}
