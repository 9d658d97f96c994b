use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use sysinfo::Disks;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{DetectionFailure, DetectionReport, Device, DeviceType};
use crate::store::{column_time, encode_time, from_sql_u64, to_sql_u64, Store};

const SKIPPED_MOUNT_PREFIXES: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/snap",
    "/boot/efi",
    "/System/Volumes/VM",
    "/System/Volumes/Preboot",
    "/System/Volumes/Recovery",
    "/System/Volumes/Update",
    "/System/Volumes/xarts",
    "/System/Volumes/iSCPreboot",
    "/System/Volumes/Hardware",
];

const SKIPPED_FILE_SYSTEMS: &[&str] = &[
    "proc", "sysfs", "tmpfs", "devtmpfs", "devfs", "overlay", "squashfs", "autofs", "cgroup",
    "cgroup2", "ramfs", "fusectl", "debugfs", "tracefs",
];

#[derive(Debug, Clone, PartialEq)]
pub struct DiskProbe {
    /// OS device name, e.g. `/dev/sdb1` or `nas:/export`.
    pub name: String,
    pub label: String,
    pub mount_point: PathBuf,
    pub file_system: Option<String>,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub is_removable: bool,
}

/// Enumerates one kind of attached storage.
pub trait DiskSource: Send + Sync {
    fn name(&self) -> &str;
    fn probe(&self) -> io::Result<Vec<DiskProbe>>;
}

/// Maps a probed disk to an identity that survives remounts.
pub trait VolumeIdentity: Send + Sync {
    fn volume_id(&self, probe: &DiskProbe) -> io::Result<String>;
}

pub struct SysinfoDiskSource;

impl DiskSource for SysinfoDiskSource {
    fn name(&self) -> &str {
        "sysinfo"
    }

    fn probe(&self) -> io::Result<Vec<DiskProbe>> {
        let disks = Disks::new_with_refreshed_list();
        let mut seen_mounts = HashSet::new();
        let mut probes = Vec::new();

        for disk in disks.list() {
            let mount_point = disk.mount_point().to_path_buf();
            let file_system = disk.file_system().to_string_lossy().to_string();
            if should_skip_mount(&mount_point, &file_system) {
                debug!("skipping pseudo mount {}", mount_point.display());
                continue;
            }
            if !seen_mounts.insert(mount_point.clone()) {
                continue;
            }

            let name = disk.name().to_string_lossy().to_string();
            probes.push(DiskProbe {
                label: default_label(&name, &mount_point),
                name,
                mount_point,
                file_system: Some(file_system).filter(|fs| !fs.is_empty()),
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
                is_removable: disk.is_removable(),
            });
        }
        Ok(probes)
    }
}

/// Platform volume UUID where one exists, otherwise a derived identity.
pub struct PlatformVolumeIdentity;

impl VolumeIdentity for PlatformVolumeIdentity {
    fn volume_id(&self, probe: &DiskProbe) -> io::Result<String> {
        match platform_volume_uuid(probe)? {
            Some(uuid) => Ok(uuid),
            None => DerivedVolumeIdentity.volume_id(probe),
        }
    }
}

/// Identity from the device name and file system, never from the mount path.
pub struct DerivedVolumeIdentity;

impl VolumeIdentity for DerivedVolumeIdentity {
    fn volume_id(&self, probe: &DiskProbe) -> io::Result<String> {
        if probe.name.trim().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "disk at {} has no device name to derive an identity from",
                    probe.mount_point.display()
                ),
            ));
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(probe.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(probe.file_system.as_deref().unwrap_or("").as_bytes());
        let hex = hasher.finalize().to_hex();
        Ok(format!("derived-{}", &hex[..32]))
    }
}

#[cfg(target_os = "linux")]
fn platform_volume_uuid(probe: &DiskProbe) -> io::Result<Option<String>> {
    if !probe.name.starts_with("/dev/") {
        return Ok(None);
    }
    let device = match fs::canonicalize(&probe.name) {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let entries = match fs::read_dir("/dev/disk/by-uuid") {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if fs::canonicalize(entry.path()).ok().as_deref() == Some(device.as_path()) {
            return Ok(Some(entry.file_name().to_string_lossy().to_string()));
        }
    }
    Ok(None)
}

#[cfg(target_os = "macos")]
fn platform_volume_uuid(probe: &DiskProbe) -> io::Result<Option<String>> {
    let output = match std::process::Command::new("diskutil")
        .arg("info")
        .arg(&probe.mount_point)
        .output()
    {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if !output.status.success() {
        return Ok(None);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().map(str::trim).find_map(|line| {
        ["Volume UUID:", "Disk / Partition UUID:"]
            .iter()
            .find_map(|key| line.strip_prefix(key))
            .map(|uuid| uuid.trim().to_string())
            .filter(|uuid| !uuid.is_empty())
    }))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_volume_uuid(_probe: &DiskProbe) -> io::Result<Option<String>> {
    Ok(None)
}

pub struct DeviceRegistry {
    store: Arc<Store>,
    sources: Vec<Box<dyn DiskSource>>,
    identity: Box<dyn VolumeIdentity>,
    cache: RwLock<Vec<Device>>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<Store>) -> Result<Self> {
        Self::with_probes(
            store,
            vec![Box::new(SysinfoDiskSource)],
            Box::new(PlatformVolumeIdentity),
        )
    }

    pub fn with_probes(
        store: Arc<Store>,
        sources: Vec<Box<dyn DiskSource>>,
        identity: Box<dyn VolumeIdentity>,
    ) -> Result<Self> {
        let registry = Self {
            store,
            sources,
            identity,
            cache: RwLock::new(Vec::new()),
        };
        registry.refresh()?;
        Ok(registry)
    }

    /// Upserts every attached device. A failing source, identity lookup or
    /// catalog write is recorded and skipped; the rest still applies.
    pub fn detect(&self) -> Result<DetectionReport> {
        let now = Utc::now();
        let mut devices = Vec::new();
        let mut failures = Vec::new();

        for source in &self.sources {
            let probes = match source.probe() {
                Ok(probes) => probes,
                Err(err) => {
                    warn!("disk source {} failed: {}", source.name(), err);
                    failures.push(DetectionFailure {
                        source: source.name().to_string(),
                        mount_point: None,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            for probe in probes {
                let id = match self.identity.volume_id(&probe) {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(
                            "volume identity failed for {}: {}",
                            probe.mount_point.display(),
                            err
                        );
                        failures.push(DetectionFailure {
                            source: source.name().to_string(),
                            mount_point: Some(probe.mount_point.to_string_lossy().to_string()),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };
                match self.upsert_probe(&id, &probe, now) {
                    Ok(device) => devices.push(device),
                    Err(err) => {
                        warn!("failed to record device {}: {}", id, err);
                        failures.push(DetectionFailure {
                            source: source.name().to_string(),
                            mount_point: Some(probe.mount_point.to_string_lossy().to_string()),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        self.refresh()?;
        info!(
            "device detection: {} device(s), {} failure(s)",
            devices.len(),
            failures.len()
        );
        Ok(DetectionReport { devices, failures })
    }

    /// Registers one probed disk outside of a full detection pass.
    pub fn register(&self, probe: DiskProbe) -> Result<Device> {
        let id = self.identity.volume_id(&probe)?;
        let device = self.upsert_probe(&id, &probe, Utc::now())?;
        self.refresh()?;
        Ok(device)
    }

    /// Registers the folder at `mount` as a device. When an attached disk is
    /// mounted exactly there, its identity is used so later detection passes
    /// update the same row. Any other folder gets an id derived from its path,
    /// which changes if the folder moves.
    pub fn register_mount(&self, mount: &Path, label: Option<String>) -> Result<Device> {
        let wanted = canonical_mount(mount);
        let attached = self
            .sources
            .iter()
            .filter_map(|source| match source.probe() {
                Ok(disks) => Some(disks),
                Err(err) => {
                    debug!("disk source {} unavailable for registration: {}", source.name(), err);
                    None
                }
            })
            .flatten()
            .find(|disk| canonical_mount(&disk.mount_point) == wanted);

        let mut disk = match attached {
            Some(disk) => disk,
            None => {
                debug!("no attached disk is mounted at {wanted}; deriving id from the path");
                DiskProbe {
                    label: default_label("", mount),
                    name: wanted.clone(),
                    mount_point: mount.to_path_buf(),
                    file_system: None,
                    total_bytes: 0,
                    available_bytes: 0,
                    is_removable: false,
                }
            }
        };
        if let Some(label) = label {
            disk.label = label;
        }
        self.register(disk)
    }

    /// Cached device list; refreshed after every registry mutation.
    pub fn list(&self) -> Result<Vec<Device>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| EngineError::LockPoisoned("device cache"))?;
        Ok(cache.clone())
    }

    pub fn refresh(&self) -> Result<Vec<Device>> {
        let devices = self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, mount_point, device_type, total_bytes, available_bytes, \
                        is_removable, first_seen, last_seen \
                 FROM devices ORDER BY last_seen DESC, id ASC",
            )?;
            let devices = stmt
                .query_map([], device_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>();
            devices
        })?;

        let mut cache = self
            .cache
            .write()
            .map_err(|_| EngineError::LockPoisoned("device cache"))?;
        *cache = devices.clone();
        Ok(devices)
    }

    pub fn get(&self, device_id: &str) -> Result<Option<Device>> {
        self.store.read(|conn| {
            conn.query_row(
                "SELECT id, label, mount_point, device_type, total_bytes, available_bytes, \
                        is_removable, first_seen, last_seen \
                 FROM devices WHERE id = ?1",
                params![device_id],
                device_from_row,
            )
            .optional()
        })
    }

    /// Idempotent; the classification is the only user-editable field.
    pub fn set_device_type(&self, device_id: &str, device_type: DeviceType) -> Result<Device> {
        let changed = self.store.write(|conn| {
            conn.execute(
                "UPDATE devices SET device_type = ?1 WHERE id = ?2",
                params![device_type, device_id],
            )
        })?;
        if changed == 0 {
            return Err(EngineError::UnknownDevice(device_id.to_string()));
        }
        info!("device {} classified as {}", device_id, device_type);

        self.refresh()?;
        self.get(device_id)?
            .ok_or_else(|| EngineError::UnknownDevice(device_id.to_string()))
    }

    /// Device whose mount point is the longest prefix of `path`.
    pub fn resolve_device(&self, path: &Path) -> Result<Device> {
        let path = canonicalize_lenient(path);
        let devices = self.list()?;
        resolve_in(&devices, &path)
            .cloned()
            .ok_or_else(|| EngineError::NoDeviceFound { path: path.clone() })
    }

    pub(crate) fn touch(&self, device_ids: &[String], at: DateTime<Utc>) -> Result<()> {
        if device_ids.is_empty() {
            return Ok(());
        }
        let seen = encode_time(&at);
        self.store.write(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE devices SET last_seen = MAX(last_seen, ?1) WHERE id = ?2",
                )?;
                for id in device_ids {
                    stmt.execute(params![seen, id])?;
                }
            }
            tx.commit()
        })?;
        self.refresh()?;
        Ok(())
    }

    fn upsert_probe(&self, id: &str, probe: &DiskProbe, now: DateTime<Utc>) -> Result<Device> {
        let mount_point = canonical_mount(&probe.mount_point);
        let seen = encode_time(&now);
        let device = self.store.write(|conn| {
            conn.execute(
                "INSERT INTO devices (id, label, mount_point, device_type, total_bytes, \
                                      available_bytes, is_removable, first_seen, last_seen) \
                 VALUES (?1, ?2, ?3, 'unknown', ?4, ?5, ?6, ?7, ?7) \
                 ON CONFLICT(id) DO UPDATE SET \
                   label = excluded.label, \
                   mount_point = excluded.mount_point, \
                   total_bytes = excluded.total_bytes, \
                   available_bytes = excluded.available_bytes, \
                   is_removable = excluded.is_removable, \
                   last_seen = excluded.last_seen",
                params![
                    id,
                    probe.label,
                    mount_point,
                    to_sql_u64(probe.total_bytes),
                    to_sql_u64(probe.available_bytes),
                    probe.is_removable,
                    seen,
                ],
            )?;
            conn.query_row(
                "SELECT id, label, mount_point, device_type, total_bytes, available_bytes, \
                        is_removable, first_seen, last_seen \
                 FROM devices WHERE id = ?1",
                params![id],
                device_from_row,
            )
        })?;
        debug!("device {} upserted at {}", device.id, device.mount_point);
        Ok(device)
    }
}

/// Longest mount-point prefix wins; a mount reused by several devices
/// resolves to the one seen most recently.
pub fn resolve_in<'a>(devices: &'a [Device], path: &Path) -> Option<&'a Device> {
    let mut best: Option<(&Device, usize)> = None;
    for device in devices {
        if device.mount_point.is_empty() {
            continue;
        }
        let mount = Path::new(&device.mount_point);
        if !path.starts_with(mount) {
            continue;
        }
        let score = mount.components().count();
        match best {
            Some((current, best_score))
                if best_score > score
                    || (best_score == score && current.last_seen >= device.last_seen) => {}
            _ => best = Some((device, score)),
        }
    }
    best.map(|(device, _)| device)
}

fn device_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        label: row.get(1)?,
        mount_point: row.get(2)?,
        device_type: row.get(3)?,
        total_bytes: from_sql_u64(row.get(4)?),
        available_bytes: from_sql_u64(row.get(5)?),
        is_removable: row.get(6)?,
        first_seen: column_time(row, 7)?,
        last_seen: column_time(row, 8)?,
    })
}

/// Canonicalizes the longest existing ancestor and re-appends the rest.
pub(crate) fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => canonicalize_lenient(parent).join(name),
        _ => path.to_path_buf(),
    }
}

fn canonical_mount(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn default_label(name: &str, mount_point: &Path) -> String {
    if !name.is_empty() && !name.starts_with("/dev/") {
        return name.to_string();
    }
    mount_point
        .file_name()
        .map(|segment| segment.to_string_lossy().to_string())
        .or_else(|| Some(name.to_string()).filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn should_skip_mount(mount_point: &Path, file_system: &str) -> bool {
    let fs = file_system.to_lowercase();
    if SKIPPED_FILE_SYSTEMS.contains(&fs.as_str()) {
        return true;
    }
    SKIPPED_MOUNT_PREFIXES
        .iter()
        .any(|prefix| mount_point.starts_with(prefix))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::{
        resolve_in, should_skip_mount, DerivedVolumeIdentity, DeviceRegistry, DiskProbe,
        DiskSource, VolumeIdentity,
    };
    use crate::error::EngineError;
    use crate::model::DeviceType;
    use crate::store::Store;

    pub(crate) fn probe(name: &str, mount: &Path) -> DiskProbe {
        DiskProbe {
            name: name.to_string(),
            label: name.to_string(),
            mount_point: mount.to_path_buf(),
            file_system: Some("ext4".to_string()),
            total_bytes: 1_000_000,
            available_bytes: 400_000,
            is_removable: false,
        }
    }

    struct FixedSource {
        probes: Vec<DiskProbe>,
    }

    impl DiskSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn probe(&self) -> io::Result<Vec<DiskProbe>> {
            Ok(self.probes.clone())
        }
    }

    struct BrokenSource;

    impl DiskSource for BrokenSource {
        fn name(&self) -> &str {
            "network"
        }

        fn probe(&self) -> io::Result<Vec<DiskProbe>> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "mount table timed out"))
        }
    }

    /// Fails for names starting with `bad`, otherwise uses the name as id.
    struct NameIdentity;

    impl VolumeIdentity for NameIdentity {
        fn volume_id(&self, probe: &DiskProbe) -> io::Result<String> {
            if probe.name.starts_with("bad") {
                return Err(io::Error::new(io::ErrorKind::Other, "no volume uuid"));
            }
            Ok(probe.name.clone())
        }
    }

    #[test]
    fn failed_device_write_is_reported_and_detection_continues() {
        let temp = TempDir::new().expect("tempdir");
        let registry = registry_with(vec![Box::new(FixedSource {
            probes: vec![
                probe("locked-drive", Path::new("/mnt/locked")),
                probe("drive-a", temp.path()),
            ],
        })]);
        registry
            .store
            .write(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_locked BEFORE INSERT ON devices \
                     WHEN NEW.id = 'locked-drive' \
                     BEGIN SELECT RAISE(ABORT, 'device row locked'); END;",
                )
            })
            .expect("install trigger");

        let report = registry.detect().expect("detect");
        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].id, "drive-a");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, "fixed");
        assert_eq!(report.failures[0].mount_point.as_deref(), Some("/mnt/locked"));
        assert!(report.failures[0].reason.contains("locked"));
        assert_eq!(registry.list().expect("list").len(), 1);
    }

    #[test]
    fn registering_a_disk_mount_uses_the_disk_identity() {
        let temp = TempDir::new().expect("tempdir");
        let folder = temp.path().join("Backups");
        std::fs::create_dir_all(&folder).expect("mkdir");
        let registry = registry_with(vec![
            Box::new(BrokenSource),
            Box::new(FixedSource {
                probes: vec![probe("drive-a", temp.path())],
            }),
        ]);

        let disk = registry
            .register_mount(temp.path(), Some("Archive".to_string()))
            .expect("register disk");
        assert_eq!(disk.id, "drive-a");
        assert_eq!(disk.label, "Archive");
        assert_eq!(disk.total_bytes, 1_000_000);

        let redetected = registry.detect().expect("detect").devices.remove(0);
        assert_eq!(redetected.id, disk.id);

        let plain = registry.register_mount(&folder, None).expect("register folder");
        assert_eq!(plain.id, super::canonical_mount(&folder));
        assert_eq!(plain.label, "Backups");
        assert_eq!(registry.list().expect("list").len(), 2);
    }

    fn registry_with(sources: Vec<Box<dyn DiskSource>>) -> DeviceRegistry {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        DeviceRegistry::with_probes(store, sources, Box::new(NameIdentity)).expect("registry")
    }

    #[test]
    fn detection_collects_failures_and_keeps_successes() {
        let temp = TempDir::new().expect("tempdir");
        let registry = registry_with(vec![
            Box::new(BrokenSource),
            Box::new(FixedSource {
                probes: vec![
                    probe("drive-a", temp.path()),
                    probe("bad-drive", Path::new("/mnt/bad")),
                ],
            }),
        ]);

        let report = registry.detect().expect("detect");
        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].id, "drive-a");
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|f| f.source == "network"));
        assert!(report
            .failures
            .iter()
            .any(|f| f.mount_point.as_deref() == Some("/mnt/bad")));
        assert_eq!(registry.list().expect("list").len(), 1);
    }

    #[test]
    fn redetection_keeps_first_seen_and_type() {
        let temp = TempDir::new().expect("tempdir");
        let registry = registry_with(vec![Box::new(FixedSource {
            probes: vec![probe("drive-a", temp.path())],
        })]);

        let first = registry.detect().expect("detect").devices.remove(0);
        registry
            .set_device_type("drive-a", DeviceType::Cold)
            .expect("classify");
        let second = registry.detect().expect("detect again").devices.remove(0);

        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(second.device_type, DeviceType::Cold);
    }

    #[test]
    fn set_device_type_is_idempotent_and_rejects_unknown_ids() {
        let temp = TempDir::new().expect("tempdir");
        let registry = registry_with(Vec::new());
        registry
            .register(probe("drive-a", temp.path()))
            .expect("register");

        let once = registry
            .set_device_type("drive-a", DeviceType::Hot)
            .expect("first");
        let twice = registry
            .set_device_type("drive-a", DeviceType::Hot)
            .expect("second");
        assert_eq!(once, twice);

        assert!(matches!(
            registry.set_device_type("missing", DeviceType::Cold),
            Err(EngineError::UnknownDevice(_))
        ));
    }

    #[test]
    fn resolves_longest_mount_prefix() {
        let temp = TempDir::new().expect("tempdir");
        let nested = temp.path().join("media").join("usb");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let registry = registry_with(Vec::new());
        registry
            .register(probe("outer", temp.path()))
            .expect("outer");
        registry.register(probe("inner", &nested)).expect("inner");

        let inner_file = nested.join("photo.jpg");
        let outer_file = temp.path().join("notes.txt");
        assert_eq!(
            registry.resolve_device(&inner_file).expect("inner").id,
            "inner"
        );
        assert_eq!(
            registry.resolve_device(&outer_file).expect("outer").id,
            "outer"
        );
        assert!(matches!(
            registry.resolve_device(Path::new("/definitely/not/mounted")),
            Err(EngineError::NoDeviceFound { .. })
        ));
    }

    #[test]
    fn reused_mount_resolves_to_latest_device() {
        let temp = TempDir::new().expect("tempdir");
        let registry = registry_with(Vec::new());
        registry.register(probe("old", temp.path())).expect("old");
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.register(probe("new", temp.path())).expect("new");

        let devices = registry.list().expect("list");
        let file = PathBuf::from(&devices[0].mount_point).join("a.txt");
        assert_eq!(resolve_in(&devices, &file).expect("match").id, "new");
    }

    #[test]
    fn derived_identity_ignores_mount_path() {
        let a = DerivedVolumeIdentity
            .volume_id(&probe("nas:/export", Path::new("/mnt/one")))
            .expect("id");
        let b = DerivedVolumeIdentity
            .volume_id(&probe("nas:/export", Path::new("/Volumes/two")))
            .expect("id");
        assert_eq!(a, b);
        assert!(DerivedVolumeIdentity
            .volume_id(&probe("", Path::new("/mnt/x")))
            .is_err());
    }

    #[test]
    fn pseudo_mounts_are_skipped() {
        assert!(should_skip_mount(Path::new("/proc"), "proc"));
        assert!(should_skip_mount(Path::new("/run/user/1000"), "ext4"));
        assert!(should_skip_mount(Path::new("/tmp"), "tmpfs"));
        assert!(!should_skip_mount(Path::new("/media/backup"), "exfat"));
    }
}
