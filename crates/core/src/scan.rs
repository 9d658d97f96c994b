use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::device::DeviceRegistry;
use crate::error::{EngineError, Result};
use crate::hasher::fingerprint_file;
use crate::index::{in_scope, relative_path, IndexWrite, LocationIndex, LocationRecord};
use crate::model::{Device, FileLocation, ScanEvent, ScanMode, ScanState, ScanSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub target: PathBuf,
    pub mode: ScanMode,
    /// Added to the configured excludes for this scan only.
    pub excludes: Vec<String>,
    /// Overrides `ScanConfig::reconcile` when set.
    pub reconcile: Option<bool>,
}

impl ScanRequest {
    pub fn new(target: impl Into<PathBuf>, mode: ScanMode) -> Self {
        Self {
            target: target.into(),
            mode,
            excludes: Vec::new(),
            reconcile: None,
        }
    }
}

/// Caller side of a running scan: the event stream plus cancel and join.
pub struct ScanHandle {
    scan_id: String,
    events: Receiver<ScanEvent>,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<Result<ScanSummary>>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    /// Next event, or `None` once the stream has ended.
    pub fn recv(&self) -> Option<ScanEvent> {
        self.events.recv().ok()
    }

    /// Blocks through every remaining event; ends after the terminal one.
    pub fn iter(&self) -> impl Iterator<Item = ScanEvent> + '_ {
        self.events.iter()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Waits for the scan to end. Unread events are discarded.
    pub fn join(self) -> Result<ScanSummary> {
        let ScanHandle { events, worker, .. } = self;
        drop(events);
        worker.join().map_err(|_| EngineError::WorkerPanicked)?
    }
}

struct ActiveScan {
    scan_id: String,
    cancel: Arc<AtomicBool>,
}

/// The one scan allowed to run in this process, whichever engine started it.
static ACTIVE_SCAN: Lazy<Mutex<Option<ActiveScan>>> = Lazy::new(|| Mutex::new(None));

/// Starts scans against one catalog. At most one scan runs per process; a
/// second `start` while one is active fails instead of queuing.
pub struct ScanEngine {
    registry: Arc<DeviceRegistry>,
    index: Arc<LocationIndex>,
    config: ScanConfig,
    last_state: Arc<Mutex<ScanState>>,
}

impl ScanEngine {
    pub fn new(registry: Arc<DeviceRegistry>, index: Arc<LocationIndex>, config: ScanConfig) -> Self {
        Self {
            registry,
            index,
            config,
            last_state: Arc::new(Mutex::new(ScanState::Idle)),
        }
    }

    pub fn start(&self, request: ScanRequest) -> Result<ScanHandle> {
        let mut active = lock_active()?;
        if let Some(active) = active.as_ref() {
            debug!("rejecting scan of {}: {} is running", request.target.display(), active.scan_id);
            return Err(EngineError::ScanAlreadyRunning);
        }

        let prepared = self.prepare(&request);
        let (target, device) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                *lock_state(&self.last_state)? = ScanState::Failed;
                return Err(err);
            }
        };

        let mut excludes = self.config.excludes.clone();
        excludes.extend(request.excludes.iter().cloned());
        let mut warnings = Vec::new();
        let matcher = ExcludeMatcher::new(&excludes, &mut warnings);

        let scan_id = Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = bounded(self.config.event_buffer);

        let job = ScanJob {
            scan_id: scan_id.clone(),
            target,
            device,
            mode: request.mode,
            reconcile: request.reconcile.unwrap_or(self.config.reconcile),
            matcher,
            warnings,
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            index: Arc::clone(&self.index),
            cancel: Arc::clone(&cancel),
            events: EventSink { tx: events_tx },
        };

        let state_ref = Arc::clone(&self.last_state);
        let worker = thread::Builder::new()
            .name("copy-ledger-scan".to_string())
            .spawn(move || job.run(state_ref))?;

        *active = Some(ActiveScan {
            scan_id: scan_id.clone(),
            cancel: Arc::clone(&cancel),
        });
        *lock_state(&self.last_state)? = ScanState::Running;
        info!("scan {} started ({})", scan_id, request.mode);

        Ok(ScanHandle {
            scan_id,
            events: events_rx,
            cancel,
            worker,
        })
    }

    /// Requests cancellation of the process's running scan. Returns `false`
    /// when nothing is running.
    pub fn cancel(&self) -> Result<bool> {
        let active = lock_active()?;
        match active.as_ref() {
            Some(active) => {
                active.cancel.store(true, Ordering::Relaxed);
                info!("scan {} cancellation requested", active.scan_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn state(&self) -> Result<ScanState> {
        Ok(*lock_state(&self.last_state)?)
    }

    fn prepare(&self, request: &ScanRequest) -> Result<(PathBuf, Device)> {
        let unreadable = |source: io::Error| EngineError::TargetUnreadable {
            path: request.target.clone(),
            source,
        };
        let target = fs::canonicalize(&request.target).map_err(unreadable)?;
        let metadata = fs::metadata(&target).map_err(unreadable)?;
        if metadata.is_dir() {
            fs::read_dir(&target).map_err(unreadable)?;
        }
        let device = self.registry.resolve_device(&target)?;
        Ok((target, device))
    }
}

fn lock_active() -> Result<MutexGuard<'static, Option<ActiveScan>>> {
    ACTIVE_SCAN
        .lock()
        .map_err(|_| EngineError::LockPoisoned("active scan"))
}

fn lock_state(state: &Mutex<ScanState>) -> Result<MutexGuard<'_, ScanState>> {
    state.lock().map_err(|_| EngineError::LockPoisoned("scan state"))
}

struct EventSink {
    tx: Sender<ScanEvent>,
}

impl EventSink {
    /// Blocks while the buffer is full. A dropped receiver is ignored.
    fn emit(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Dropped when the buffer is full; the next one carries newer counts.
    fn progress(&self, scanned: u64, total: u64) {
        match self.tx.try_send(ScanEvent::Progress { scanned, total }) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!("progress coalesced at {scanned}/{total}"),
        }
    }
}

struct ProgressTicker {
    every_files: u64,
    interval: Duration,
    last: Instant,
}

impl ProgressTicker {
    fn new(config: &ScanConfig) -> Self {
        Self {
            every_files: config.progress_every_files.max(1),
            interval: Duration::from_millis(config.progress_interval_ms),
            last: Instant::now(),
        }
    }

    fn due(&mut self, scanned: u64) -> bool {
        if scanned % self.every_files == 0 || self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            return true;
        }
        false
    }
}

/// Output of the stat stage, consumed by the hash stage.
#[derive(Debug)]
enum Staged {
    Ready {
        path: PathBuf,
        file_path: String,
        file_name: String,
        size: u64,
        modified: Option<DateTime<Utc>>,
        existing: Option<FileLocation>,
    },
    Failed {
        path: PathBuf,
        message: String,
    },
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    scanned: u64,
    hashed: u64,
    added: u64,
    removed: u64,
    errors: u64,
}

struct ScanJob {
    scan_id: String,
    target: PathBuf,
    device: Device,
    mode: ScanMode,
    reconcile: bool,
    matcher: ExcludeMatcher,
    warnings: Vec<String>,
    config: ScanConfig,
    registry: Arc<DeviceRegistry>,
    index: Arc<LocationIndex>,
    cancel: Arc<AtomicBool>,
    events: EventSink,
}

impl ScanJob {
    /// Frees the active scan before the terminal event goes out, so a caller that
    /// reacts to it can start the next scan right away.
    fn run(self, last_state: Arc<Mutex<ScanState>>) -> Result<ScanSummary> {
        let outcome = self.execute();
        let state = match &outcome {
            Ok(summary) => summary.state,
            Err(_) => ScanState::Failed,
        };

        match ACTIVE_SCAN.lock() {
            Ok(mut active) => {
                if active
                    .as_ref()
                    .is_some_and(|running| running.scan_id == self.scan_id)
                {
                    *active = None;
                }
            }
            Err(_) => warn!("active scan lock poisoned while releasing {}", self.scan_id),
        }
        match last_state.lock() {
            Ok(mut last_state) => *last_state = state,
            Err(_) => warn!("scan state lock poisoned while releasing {}", self.scan_id),
        }

        let terminal = match &outcome {
            Ok(summary) if summary.state == ScanState::Cancelled => ScanEvent::Cancelled {
                scanned: summary.scanned,
                total: summary.total,
            },
            Ok(summary) => ScanEvent::Finished {
                scanned: summary.scanned,
                hashed: summary.hashed,
                added: summary.added,
                removed: summary.removed,
            },
            Err(err) => {
                warn!("scan {} failed: {}", self.scan_id, err);
                ScanEvent::Failed {
                    reason: err.to_string(),
                }
            }
        };
        self.events.emit(terminal);
        outcome
    }

    fn execute(&self) -> Result<ScanSummary> {
        let mut counters = Counters::default();
        let (paths, walk_errors) = self.enumerate();
        counters.total = paths.len() as u64;

        self.events.emit(ScanEvent::Started {
            total_files: counters.total,
        });
        for message in self.warnings.iter().chain(walk_errors.iter()) {
            counters.errors += 1;
            self.events.emit(ScanEvent::Error {
                message: message.clone(),
            });
        }

        let mut seen = HashSet::new();
        thread::scope(|scope| -> Result<()> {
            let (staged_tx, staged_rx) = bounded::<Staged>(self.config.pipeline_depth);
            let paths = &paths;
            scope.spawn(move || self.stat_stage(paths, staged_tx));
            self.hash_stage(staged_rx, &mut counters, &mut seen)
        })?;

        let state = if self.is_cancelled() {
            ScanState::Cancelled
        } else {
            ScanState::Finished
        };

        if state == ScanState::Finished {
            let vanished = self.vanished_rows(&seen)?;
            counters.removed = vanished.len() as u64;
            if self.reconcile && !vanished.is_empty() {
                if walk_errors.is_empty() {
                    let deleted = self.index.remove(&vanished)?;
                    info!("scan {} reconciled {} vanished row(s)", self.scan_id, deleted);
                } else {
                    warn!(
                        "scan {} skipped reconciliation: {} walk error(s) left the tree partially read",
                        self.scan_id,
                        walk_errors.len()
                    );
                }
            }
        }

        if counters.scanned > 0 {
            self.registry
                .touch(&[self.device.id.clone()], Utc::now())?;
        }
        // The closing count is never coalesced away.
        self.events.emit(ScanEvent::Progress {
            scanned: counters.scanned,
            total: counters.total,
        });

        info!(
            "scan {} {:?}: {}/{} scanned, {} hashed, {} added, {} removed, {} error(s)",
            self.scan_id,
            state,
            counters.scanned,
            counters.total,
            counters.hashed,
            counters.added,
            counters.removed,
            counters.errors
        );
        Ok(ScanSummary {
            scan_id: self.scan_id.clone(),
            state,
            total: counters.total,
            scanned: counters.scanned,
            hashed: counters.hashed,
            added: counters.added,
            removed: counters.removed,
            errors: counters.errors,
        })
    }

    /// Counts regular files under the target before any hashing starts.
    fn enumerate(&self) -> (Vec<PathBuf>, Vec<String>) {
        let mut paths = Vec::new();
        let mut errors = Vec::new();

        let iter = WalkDir::new(&self.target)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.matcher.is_excluded(entry.path()));

        for item in iter {
            if self.is_cancelled() {
                debug!("scan {} cancelled during enumeration", self.scan_id);
                break;
            }
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("walk error under {}: {}", self.target.display(), err);
                    errors.push(format!("walk error under {}: {}", self.target.display(), err));
                    continue;
                }
            };
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        debug!("scan {} enumerated {} file(s)", self.scan_id, paths.len());
        (paths, errors)
    }

    fn stat_stage(&self, paths: &[PathBuf], staged: Sender<Staged>) {
        let mount = Path::new(&self.device.mount_point);
        for path in paths {
            if self.is_cancelled() {
                break;
            }
            let item = stage_file(path, mount, &self.device.id, &self.index);
            if staged.send(item).is_err() {
                break;
            }
        }
    }

    fn hash_stage(
        &self,
        staged: Receiver<Staged>,
        counters: &mut Counters,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let batch_size = self.config.commit_batch.max(1);
        let mut pending = Vec::with_capacity(batch_size);
        let mut ticker = ProgressTicker::new(&self.config);

        for item in staged.iter() {
            if self.is_cancelled() {
                break;
            }

            match item {
                Staged::Failed { path, message } => {
                    warn!("skipping {}: {}", path.display(), message);
                    counters.errors += 1;
                    self.events.emit(ScanEvent::Error { message });
                }
                Staged::Ready {
                    path,
                    file_path,
                    file_name,
                    size,
                    modified,
                    existing,
                } => {
                    seen.insert(file_path.clone());

                    if let Some(existing) = existing.filter(|existing| {
                        self.mode == ScanMode::Quick
                            && modified.is_some()
                            && existing.file_size == size
                            && existing.modified_at == modified
                    }) {
                        pending.push(IndexWrite::Verify {
                            id: existing.id,
                            at: Utc::now(),
                        });
                    } else {
                        match fingerprint_file(
                            &path,
                            size,
                            modified,
                            self.mode,
                            self.config.quick_sample_bytes,
                            &self.cancel,
                        ) {
                            Ok(Some(fingerprint)) => {
                                counters.hashed += 1;
                                self.events.emit(ScanEvent::FileHashed {
                                    path: path.to_string_lossy().to_string(),
                                    hash: fingerprint.hash.clone(),
                                });
                                pending.push(IndexWrite::Upsert(LocationRecord {
                                    content_hash: fingerprint.hash,
                                    device_id: self.device.id.clone(),
                                    file_path,
                                    file_name,
                                    file_size: size,
                                    modified_at: modified,
                                    last_verified: Utc::now(),
                                    scan_mode: fingerprint.mode,
                                }));
                            }
                            Ok(None) => break,
                            Err(err) => {
                                let message = format!("failed to read {}: {}", path.display(), err);
                                warn!("{message}");
                                counters.errors += 1;
                                self.events.emit(ScanEvent::Error { message });
                            }
                        }
                    }
                }
            }

            counters.scanned += 1;
            if pending.len() >= batch_size {
                counters.added += self.index.apply(&pending)?.inserted;
                pending.clear();
            }
            if ticker.due(counters.scanned) {
                self.events.progress(counters.scanned, counters.total);
            }
        }

        counters.added += self.index.apply(&pending)?.inserted;
        Ok(())
    }

    /// Indexed rows under the target that this pass did not observe.
    fn vanished_rows(&self, seen: &HashSet<String>) -> Result<Vec<i64>> {
        let mount = Path::new(&self.device.mount_point);
        let scope = relative_path(mount, &self.target).unwrap_or_default();
        let rows = self.index.by_device(&self.device.id)?;
        Ok(rows
            .into_iter()
            .filter(|row| in_scope(&row.file_path, &scope))
            .filter(|row| !seen.contains(&row.file_path))
            .filter(|row| !self.matcher.is_excluded(&mount.join(&row.file_path)))
            .map(|row| row.id)
            .collect())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

fn stage_file(path: &Path, mount: &Path, device_id: &str, index: &LocationIndex) -> Staged {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            return Staged::Failed {
                path: path.to_path_buf(),
                message: format!("metadata read failed for {}: {}", path.display(), err),
            }
        }
    };

    let Some(file_path) = relative_path(mount, path) else {
        return Staged::Failed {
            path: path.to_path_buf(),
            message: format!("{} is outside device mount {}", path.display(), mount.display()),
        };
    };

    let existing = match index.get(device_id, &file_path) {
        Ok(existing) => existing,
        Err(err) => {
            debug!("index lookup failed for {}: {}", file_path, err);
            None
        }
    };

    Staged::Ready {
        file_name: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.clone()),
        path: path.to_path_buf(),
        file_path,
        size: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        existing,
    }
}

/// Glob patterns go through globset; plain text matches as a
/// case-insensitive substring of the full path.
struct ExcludeMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
}

impl ExcludeMatcher {
    fn new(patterns: &[String], warnings: &mut Vec<String>) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();
        let mut globs = 0_usize;

        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            if is_plain_substring_pattern(pattern) {
                substrings.push(pattern.to_lowercase());
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    globs += 1;
                }
                Err(err) => {
                    warnings.push(format!(
                        "invalid exclude glob '{pattern}': {err}; using substring fallback"
                    ));
                    substrings.push(pattern.to_lowercase());
                }
            }
        }

        let globset = if globs == 0 {
            None
        } else {
            match builder.build() {
                Ok(set) => Some(set),
                Err(err) => {
                    warnings.push(format!(
                        "failed to compile exclude globs: {err}; glob excludes disabled"
                    ));
                    None
                }
            }
        };

        Self {
            globset,
            substrings,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if let Some(globset) = &self.globset {
            if globset.is_match(path) {
                return true;
            }
        }
        if self.substrings.is_empty() {
            return false;
        }
        let lowered = path.to_string_lossy().to_lowercase();
        self.substrings
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex, MutexGuard};

    use tempfile::TempDir;

    use super::{stage_file, ExcludeMatcher, ScanEngine, ScanRequest, Staged};
    use crate::config::ScanConfig;
    use crate::device::tests::probe;
    use crate::device::{DerivedVolumeIdentity, DeviceRegistry};
    use crate::error::EngineError;
    use crate::index::LocationIndex;
    use crate::model::{ScanEvent, ScanMode, ScanState};
    use crate::store::Store;

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Scans share one process-wide slot, so tests that start them take turns.
    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    struct Harness {
        engine: ScanEngine,
        index: Arc<LocationIndex>,
        device_id: String,
        _serial: MutexGuard<'static, ()>,
    }

    fn harness(root: &Path, config: ScanConfig) -> Harness {
        let _serial = serial();
        let (engine, index, device_id) = catalog(root, config);
        Harness {
            engine,
            index,
            device_id,
            _serial,
        }
    }

    fn catalog(root: &Path, config: ScanConfig) -> (ScanEngine, Arc<LocationIndex>, String) {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let registry = Arc::new(
            DeviceRegistry::with_probes(
                Arc::clone(&store),
                Vec::new(),
                Box::new(DerivedVolumeIdentity),
            )
            .expect("registry"),
        );
        let device = registry.register(probe("drive", root)).expect("register");
        let index = Arc::new(LocationIndex::new(store));
        (
            ScanEngine::new(registry, Arc::clone(&index), config),
            index,
            device.id,
        )
    }

    fn write_files(root: &Path, count: usize) {
        for i in 0..count {
            let dir = root.join(format!("batch-{}", i % 3));
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join(format!("file-{i}.dat")), format!("payload {i}")).expect("write");
        }
    }

    fn run_to_end(harness: &Harness, request: ScanRequest) -> Vec<ScanEvent> {
        let handle = harness.engine.start(request).expect("start");
        handle.iter().collect()
    }

    #[test]
    fn events_are_ordered_and_terminal_is_last() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 5);
        let harness = harness(temp.path(), ScanConfig::default());

        let events = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));
        assert!(matches!(events[0], ScanEvent::Started { total_files: 5 }));
        assert_eq!(
            events.last(),
            Some(&ScanEvent::Finished {
                scanned: 5,
                hashed: 5,
                added: 5,
                removed: 0
            })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ScanEvent::FileHashed { .. }))
                .count(),
            5
        );
        assert_eq!(harness.engine.state().expect("state"), ScanState::Finished);
    }

    #[test]
    fn second_full_scan_adds_nothing() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 6);
        let harness = harness(temp.path(), ScanConfig::default());

        run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));
        let before = harness.index.by_device(&harness.device_id).expect("rows");
        let events = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));
        let after = harness.index.by_device(&harness.device_id).expect("rows");

        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { added: 0, removed: 0, .. })
        ));
        let key = |rows: &[crate::model::FileLocation]| {
            rows.iter()
                .map(|row| (row.id, row.file_path.clone(), row.content_hash.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&before), key(&after));
    }

    #[test]
    fn cancelling_keeps_flushed_rows() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 40);
        let config = ScanConfig {
            event_buffer: 1,
            commit_batch: 4,
            ..ScanConfig::default()
        };
        let harness = harness(temp.path(), config);

        let handle = harness
            .engine
            .start(ScanRequest::new(temp.path(), ScanMode::Full))
            .expect("start");
        assert!(matches!(handle.recv(), Some(ScanEvent::Started { total_files: 40 })));
        assert!(harness.engine.cancel().expect("cancel"));

        let events = handle.iter().collect::<Vec<_>>();
        let Some(ScanEvent::Cancelled { scanned, total }) = events.last().cloned() else {
            panic!("expected a cancelled terminal event, got {:?}", events.last());
        };
        assert!(scanned < total);

        let summary = handle.join().expect("join");
        assert_eq!(summary.state, ScanState::Cancelled);
        let rows = harness.index.by_device(&harness.device_id).expect("rows");
        assert_eq!(rows.len() as u64, summary.added);
        assert_eq!(summary.added, summary.hashed);
        assert_eq!(harness.engine.state().expect("state"), ScanState::Cancelled);
        assert!(!harness.engine.cancel().expect("idle cancel"));
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 12);
        let config = ScanConfig {
            event_buffer: 1,
            ..ScanConfig::default()
        };
        let harness = harness(temp.path(), config);

        let first = harness
            .engine
            .start(ScanRequest::new(temp.path(), ScanMode::Full))
            .expect("start");
        assert!(matches!(
            harness
                .engine
                .start(ScanRequest::new(temp.path(), ScanMode::Quick)),
            Err(EngineError::ScanAlreadyRunning)
        ));

        let events = first.iter().collect::<Vec<_>>();
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { scanned: 12, .. })
        ));
    }

    #[test]
    fn engines_over_separate_catalogs_share_one_active_scan() {
        let temp = TempDir::new().expect("tempdir");
        let other = TempDir::new().expect("tempdir");
        write_files(temp.path(), 12);
        write_files(other.path(), 3);
        let config = ScanConfig {
            event_buffer: 1,
            ..ScanConfig::default()
        };
        let harness = harness(temp.path(), config);
        let (second, second_index, second_device) = catalog(other.path(), ScanConfig::default());

        let first = harness
            .engine
            .start(ScanRequest::new(temp.path(), ScanMode::Full))
            .expect("start");
        assert!(matches!(
            second.start(ScanRequest::new(other.path(), ScanMode::Full)),
            Err(EngineError::ScanAlreadyRunning)
        ));
        assert_eq!(second.state().expect("state"), ScanState::Idle);

        let events = first.iter().collect::<Vec<_>>();
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { scanned: 12, .. })
        ));

        let events = second
            .start(ScanRequest::new(other.path(), ScanMode::Full))
            .expect("start after first finished")
            .iter()
            .collect::<Vec<_>>();
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { scanned: 3, .. })
        ));
        assert_eq!(second_index.by_device(&second_device).expect("rows").len(), 3);
    }

    #[test]
    fn unreadable_file_is_reported_and_scan_continues() {
        let temp = TempDir::new().expect("tempdir");
        for i in 0..40 {
            fs::write(temp.path().join(format!("file-{i:02}.dat")), format!("payload {i}"))
                .expect("write");
        }
        let config = ScanConfig {
            event_buffer: 1,
            ..ScanConfig::default()
        };
        let harness = harness(temp.path(), config);

        let handle = harness
            .engine
            .start(ScanRequest::new(temp.path(), ScanMode::Full))
            .expect("start");
        assert!(matches!(handle.recv(), Some(ScanEvent::Started { total_files: 40 })));
        fs::remove_file(temp.path().join("file-39.dat")).expect("remove");

        let mut events = vec![ScanEvent::Started { total_files: 40 }];
        events.extend(handle.iter());
        let errors = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Error { message } => Some(message.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("file-39.dat"));
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished {
                scanned: 40,
                hashed: 39,
                ..
            })
        ));

        let progress = events
            .iter()
            .enumerate()
            .filter(|(_, event)| matches!(event, ScanEvent::Progress { .. }))
            .map(|(position, _)| position)
            .collect::<Vec<_>>();
        assert!(!progress.is_empty());
        assert!(progress.iter().all(|position| *position > 0));
        assert_eq!(handle.join().expect("join").errors, 1);
        assert_eq!(
            harness.index.by_device(&harness.device_id).expect("rows").len(),
            39
        );
    }

    #[test]
    fn missing_target_fails_before_starting() {
        let temp = TempDir::new().expect("tempdir");
        let harness = harness(temp.path(), ScanConfig::default());
        let result = harness
            .engine
            .start(ScanRequest::new(temp.path().join("absent"), ScanMode::Full));
        assert!(matches!(result, Err(EngineError::TargetUnreadable { .. })));
        assert_eq!(harness.engine.state().expect("state"), ScanState::Failed);
    }

    #[test]
    fn quick_rescan_skips_unchanged_files() {
        let temp = TempDir::new().expect("tempdir");
        let config = ScanConfig {
            quick_sample_bytes: 16,
            ..ScanConfig::default()
        };
        let harness = harness(temp.path(), config);
        let big = temp.path().join("big.bin");
        fs::write(&big, vec![3_u8; 4096]).expect("write");
        fs::write(temp.path().join("small.txt"), b"hi").expect("write");

        let first = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Quick));
        assert!(matches!(
            first.last(),
            Some(ScanEvent::Finished { hashed: 2, added: 2, .. })
        ));
        let rows = harness.index.by_device(&harness.device_id).expect("rows");
        let modes = rows
            .iter()
            .map(|row| (row.file_name.as_str(), row.scan_mode))
            .collect::<Vec<_>>();
        assert_eq!(
            modes,
            vec![("big.bin", ScanMode::Quick), ("small.txt", ScanMode::Full)]
        );

        let second = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Quick));
        assert!(matches!(
            second.last(),
            Some(ScanEvent::Finished { scanned: 2, hashed: 0, added: 0, .. })
        ));

        fs::write(&big, vec![4_u8; 5000]).expect("rewrite");
        let third = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Quick));
        assert!(matches!(
            third.last(),
            Some(ScanEvent::Finished { hashed: 1, added: 0, .. })
        ));
    }

    #[test]
    fn vanished_files_are_counted_and_reconciled_on_request() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 3);
        let harness = harness(temp.path(), ScanConfig::default());
        run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));

        fs::remove_file(temp.path().join("batch-0").join("file-0.dat")).expect("remove");
        let counted = run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));
        assert!(matches!(
            counted.last(),
            Some(ScanEvent::Finished { removed: 1, .. })
        ));
        assert_eq!(harness.index.count().expect("count"), 3);

        let mut request = ScanRequest::new(temp.path(), ScanMode::Full);
        request.reconcile = Some(true);
        let reconciled = run_to_end(&harness, request);
        assert!(matches!(
            reconciled.last(),
            Some(ScanEvent::Finished { removed: 1, .. })
        ));
        assert_eq!(harness.index.count().expect("count"), 2);
    }

    #[test]
    fn subtree_scan_only_counts_its_own_rows() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 6);
        let harness = harness(temp.path(), ScanConfig::default());
        run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));

        let events = run_to_end(
            &harness,
            ScanRequest::new(temp.path().join("batch-1"), ScanMode::Full),
        );
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { scanned: 2, removed: 0, .. })
        ));
    }

    #[test]
    fn excluded_paths_are_neither_scanned_nor_removed() {
        let temp = TempDir::new().expect("tempdir");
        write_files(temp.path(), 6);
        let harness = harness(temp.path(), ScanConfig::default());
        run_to_end(&harness, ScanRequest::new(temp.path(), ScanMode::Full));

        let mut request = ScanRequest::new(temp.path(), ScanMode::Full);
        request.excludes = vec!["batch-2".to_string()];
        request.reconcile = Some(true);
        let events = run_to_end(&harness, request);
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished { scanned: 4, removed: 0, .. })
        ));
        assert_eq!(harness.index.count().expect("count"), 6);
    }

    #[test]
    fn vanished_file_is_staged_as_error() {
        let temp = TempDir::new().expect("tempdir");
        let harness = harness(temp.path(), ScanConfig::default());
        let staged = stage_file(
            &temp.path().join("gone.txt"),
            temp.path(),
            &harness.device_id,
            &harness.index,
        );
        match staged {
            Staged::Failed { message, .. } => assert!(message.contains("gone.txt")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn exclude_matcher_supports_glob_and_substring() {
        let mut warnings = Vec::new();
        let matcher = ExcludeMatcher::new(
            &[
                "**/*.tmp".to_string(),
                "Cache".to_string(),
                "[bad".to_string(),
            ],
            &mut warnings,
        );
        assert!(matcher.is_excluded(Path::new("/data/a/b.tmp")));
        assert!(matcher.is_excluded(Path::new("/data/cache/x.bin")));
        assert!(matcher.is_excluded(Path::new("/data/[bad/x")));
        assert!(!matcher.is_excluded(Path::new("/data/keep.txt")));
        assert_eq!(warnings.len(), 1);
    }
}
