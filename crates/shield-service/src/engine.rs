//! The integrity engine.
//!
//! Owns the protected-target set, the maintenance latch, per-path
//! cooldowns, the worker pool and the persistent stores, and routes
//! watcher/tracker events to the classifier. Modification events are
//! classified inline on the event loop so rapid-fire events on one path
//! collapse into a single classification; new-file adoption is offloaded
//! to the worker pool.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use shield_core::{analysis, AuditLog, BaselineStore, MonitorSettings, RiskLevel, ShadowStore};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::alert::{Alert, AlertSink, LogAlertSink};
use crate::classifier::{self, Verdict};
use crate::restore;
use crate::tracker::RenameTracker;
use crate::watcher::{DirWatcher, FileEvent};

/// Suppression window for rapid-fire modification events on one path.
const COOLDOWN: std::time::Duration = std::time::Duration::from_secs(2);
/// Readability retries while a new file is still being written.
const ADOPT_ATTEMPTS: usize = 10;
const ADOPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(200);
/// Quiesce delay after flipping the maintenance latch, letting in-flight
/// handlers observe it before bulk restore begins.
const MAINTENANCE_QUIESCE: std::time::Duration = std::time::Duration::from_millis(500);
const WORKERS: usize = 4;

const THREAT_LABEL: &str = "Ransomware / hostile modification";

pub type UiCallback = Arc<dyn Fn() + Send + Sync>;

/// Locations of the engine's persistent state.
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub key_path: PathBuf,
    pub shadow_dir: PathBuf,
    pub audit_path: PathBuf,
    pub settings: MonitorSettings,
}

impl EngineConfig {
    /// Everything under one data directory, default settings.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db_path: dir.join("integrity.db"),
            key_path: dir.join("secret.key"),
            shadow_dir: dir.join(".shadow_copies"),
            audit_path: dir.join("security_audit.json"),
            settings: MonitorSettings::default(),
        }
    }
}

pub struct IntegrityEngine {
    baseline: BaselineStore,
    shadow: ShadowStore,
    audit: AuditLog,
    settings: RwLock<MonitorSettings>,
    targets: RwLock<BTreeSet<PathBuf>>,
    cooldowns: Mutex<HashMap<PathBuf, Instant>>,
    maintenance: AtomicBool,
    running: AtomicBool,
    trackers: tokio::sync::Mutex<HashMap<PathBuf, RenameTracker>>,
    workers: Arc<Semaphore>,
    events_tx: mpsc::Sender<FileEvent>,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<FileEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    alert_sink: Arc<dyn AlertSink>,
    ui_callback: Option<UiCallback>,
}

impl IntegrityEngine {
    pub fn new(config: EngineConfig, targets: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let baseline = BaselineStore::open(&config.db_path, &config.key_path)?;
        let shadow = ShadowStore::new(&config.shadow_dir);
        let audit = AuditLog::new(&config.audit_path);
        let targets: BTreeSet<PathBuf> = targets.into_iter().map(canonical_or).collect();
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            baseline,
            shadow,
            audit,
            settings: RwLock::new(config.settings),
            targets: RwLock::new(targets),
            cooldowns: Mutex::new(HashMap::new()),
            maintenance: AtomicBool::new(false),
            running: AtomicBool::new(false),
            trackers: tokio::sync::Mutex::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(WORKERS)),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
            shutdown_tx,
            alert_sink: Arc::new(LogAlertSink),
            ui_callback: None,
        })
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    /// The callback must be safe to invoke from worker tasks; UIs post to
    /// their own event queue.
    pub fn with_ui_callback(mut self, callback: UiCallback) -> Self {
        self.ui_callback = Some(callback);
        self
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn baseline(&self) -> &BaselineStore {
        &self.baseline
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.shadow
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.targets.read().iter().cloned().collect()
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── settings ────────────────────────────────────────────────────────

    pub fn update_settings(&self, save_logs: bool, alert_email: String, auto_restore: bool) {
        let mut settings = self.settings.write();
        settings.save_logs = save_logs;
        settings.alert_email = alert_email;
        settings.auto_restore = auto_restore;
        info!(auto_restore, save_logs, "settings updated");
    }

    pub fn clear_audit_logs(&self) -> bool {
        self.audit.clear()
    }

    // ── baseline scan ───────────────────────────────────────────────────

    /// Expand every target into its file set, reset the store and baseline
    /// each file on a transient bounded pool. Files that fail to hash are
    /// excluded; processing continues.
    pub async fn scan_and_save_baseline(self: &Arc<Self>) -> Result<Vec<PathBuf>> {
        info!("building protection baseline");
        self.baseline.clear()?;

        let files = self.expand_targets();
        let pool = Arc::new(Semaphore::new(WORKERS));
        let mut handles = Vec::with_capacity(files.len());
        for path in files {
            let engine = self.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return None;
                };
                engine.baseline_file(&path)
            }));
        }

        let mut batch = Vec::new();
        for handle in handles {
            if let Ok(Some((path, hash))) = handle.await {
                batch.push((path.to_string_lossy().into_owned(), hash));
            }
        }

        let mut protected = Vec::with_capacity(batch.len());
        for (path, _) in &batch {
            self.log_incident(format!("File under protection: {path}"), RiskLevel::Init);
            protected.push(PathBuf::from(path));
        }
        self.baseline.put_batch(&batch)?;
        info!(count = protected.len(), "baseline committed");
        Ok(protected)
    }

    pub fn baseline_is_empty(&self) -> Result<bool> {
        Ok(self.baseline.count()? == 0)
    }

    fn baseline_file(&self, path: &Path) -> Option<(PathBuf, String)> {
        restore::make_writable(path);
        let hash = analysis::hash_file(path)?;
        if !self.shadow.backup(path) {
            warn!(path = %path.display(), "shadow backup failed during baseline");
        }
        Some((path.to_path_buf(), hash))
    }

    fn expand_targets(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for target in self.targets.read().iter() {
            if target.is_file() {
                files.push(target.clone());
            } else if target.is_dir() {
                for entry in WalkDir::new(target)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    if entry.file_type().is_file() {
                        files.push(entry.path().to_path_buf());
                    }
                }
            }
        }
        files
    }

    // ── targets at runtime ──────────────────────────────────────────────

    /// The watcher's subscription set is not recomputed; the relevance
    /// filter alone decides what is in scope.
    pub async fn add_target(self: &Arc<Self>, path: PathBuf) {
        let path = canonical_or(path);
        self.targets.write().insert(path.clone());
        if self.baseline_one(&path) {
            info!(path = %path.display(), "target added");
        }
        if path.is_file() && self.is_running() {
            self.spawn_tracker(path).await;
        }
        self.notify_ui();
    }

    pub async fn remove_target(self: &Arc<Self>, path: PathBuf) {
        let path = canonical_or(path);
        if self.targets.write().remove(&path) {
            if let Err(e) = self.baseline.delete(&path.to_string_lossy()) {
                warn!(path = %path.display(), error = %e, "baseline delete failed");
            }
            if let Some(tracker) = self.trackers.lock().await.remove(&path) {
                tracker.stop().await;
            }
            info!(path = %path.display(), "target removed");
            self.notify_ui();
        }
    }

    // ── event dispatch ──────────────────────────────────────────────────

    /// Entry point for watcher and tracker events. The maintenance latch
    /// turns everything into a no-op.
    pub async fn handle_event(self: &Arc<Self>, event: FileEvent) {
        if self.is_maintenance() {
            return;
        }
        match event {
            FileEvent::Created(path) => {
                if !self.is_relevant(&path) {
                    return;
                }
                let engine = self.clone();
                let workers = self.workers.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    engine.adopt_file(&path).await;
                });
            }
            FileEvent::Modified(path) => {
                if !self.is_relevant(&path) {
                    return;
                }
                self.handle_modified(&path).await;
            }
            FileEvent::Moved { from, to } => self.handle_moved(&from, &to).await,
            FileEvent::Deleted(path) => self.handle_deleted(&path),
        }
    }

    /// New-file adoption: wait out in-progress writes, then record and
    /// shadow the file.
    async fn adopt_file(&self, path: &Path) {
        if self.is_maintenance() {
            return;
        }
        if !self.wait_readable(path).await {
            return;
        }
        if self.baseline_one(path) {
            self.log_incident(format!("New file protected: {}", path.display()), RiskLevel::Created);
            info!(path = %path.display(), "new file adopted");
            self.notify_ui();
        }
    }

    async fn wait_readable(&self, path: &Path) -> bool {
        for _ in 0..ADOPT_ATTEMPTS {
            if !path.exists() {
                return false;
            }
            if std::fs::File::open(path).is_ok() {
                return true;
            }
            tokio::time::sleep(ADOPT_BACKOFF).await;
        }
        path.exists()
    }

    /// Hash, record and shadow one file; the baseline-of-one routine.
    fn baseline_one(&self, path: &Path) -> bool {
        let Some(hash) = analysis::hash_file(path) else {
            return false;
        };
        if let Err(e) = self.baseline.put(&path.to_string_lossy(), &hash) {
            warn!(path = %path.display(), error = %e, "baseline update failed");
            return false;
        }
        if !self.shadow.backup(path) {
            warn!(path = %path.display(), "shadow backup failed");
        }
        true
    }

    /// Handles both watcher-reported moves (directory members) and
    /// tracker-reported moves (file targets leaving the watched tree).
    async fn handle_moved(self: &Arc<Self>, from: &Path, to: &Path) {
        let was_file_target = {
            let mut targets = self.targets.write();
            if targets.remove(from) {
                targets.insert(to.to_path_buf());
                true
            } else {
                false
            }
        };
        if was_file_target {
            // Re-key the tracker registry; the tracker itself already
            // follows the new path through its handle.
            let mut trackers = self.trackers.lock().await;
            if let Some(tracker) = trackers.remove(from) {
                trackers.insert(to.to_path_buf(), tracker);
            }
        }

        let to_relevant = was_file_target || self.is_relevant(to);
        let from_relevant = was_file_target || self.is_relevant(from);

        if to_relevant {
            if self.wait_readable(to).await {
                self.baseline_one(to);
            }
            self.log_incident(
                format!("Moved: {} -> {}", from.display(), to.display()),
                RiskLevel::Moved,
            );
            info!(from = %from.display(), to = %to.display(), "protected file moved");
        }
        if from_relevant {
            if let Err(e) = self.baseline.delete(&from.to_string_lossy()) {
                warn!(path = %from.display(), error = %e, "baseline delete failed");
            }
        }
        self.notify_ui();
    }

    fn handle_deleted(&self, path: &Path) {
        if !self.is_relevant(path) {
            return;
        }
        // A deleted file target is the rename tracker's business: the held
        // handle distinguishes a rename from a real loss.
        if self.covered_by_file_target(path) {
            return;
        }
        if let Err(e) = self.baseline.delete(&path.to_string_lossy()) {
            warn!(path = %path.display(), error = %e, "baseline delete failed");
        }
        self.log_incident(format!("File deleted: {}", path.display()), RiskLevel::Deleted);
        self.notify_ui();
    }

    /// The decision core for modification events.
    pub async fn handle_modified(self: &Arc<Self>, path: &Path) {
        if !path.exists() {
            return;
        }
        {
            let cooldowns = self.cooldowns.lock();
            if let Some(last) = cooldowns.get(path) {
                if last.elapsed() < COOLDOWN {
                    return;
                }
            }
        }

        let Some(new_hash) = analysis::hash_file(path) else {
            return;
        };
        let key = path.to_string_lossy().into_owned();
        let old_hash = self.lookup_hash(path, &key);

        let Some(old_hash) = old_hash else {
            // First sighting: record without classification.
            if let Err(e) = self.baseline.put(&key, &new_hash) {
                warn!(path = %path.display(), error = %e, "baseline update failed");
            }
            debug!(path = %path.display(), "first sighting recorded");
            return;
        };
        if new_hash == old_hash {
            return;
        }

        self.stamp_cooldown(path);
        info!(path = %path.display(), "content change detected");

        match classifier::classify(path) {
            Verdict::Attack => {
                warn!(path = %path.display(), "hostile change classified");
                let auto_restore = self.settings.read().auto_restore;
                if auto_restore {
                    self.restore_from_shadow(path, false).await;
                    // The engine's own write lands after the anti-clobber
                    // hold; refresh the window so it stays suppressed.
                    self.stamp_cooldown(path);
                } else {
                    self.log_incident(
                        format!("Attack detected (restore disabled): {}", path.display()),
                        RiskLevel::Warning,
                    );
                }
            }
            Verdict::Legitimate => {
                if !self.shadow.backup(path) {
                    warn!(path = %path.display(), "shadow refresh failed");
                }
                if let Err(e) = self.baseline.put(&key, &new_hash) {
                    warn!(path = %path.display(), error = %e, "baseline update failed");
                }
                self.log_incident(format!("Legitimate change: {}", path.display()), RiskLevel::Modified);
                debug!(path = %path.display(), "legitimate change accepted");
            }
        }
    }

    fn stamp_cooldown(&self, path: &Path) {
        self.cooldowns.lock().insert(path.to_path_buf(), Instant::now());
    }

    fn lookup_hash(&self, path: &Path, key: &str) -> Option<String> {
        match self.baseline.get(key) {
            Ok(Some(hash)) => Some(hash),
            Ok(None) => self.lookup_by_canonical(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "baseline lookup failed");
                None
            }
        }
    }

    /// Fallback for paths recorded under a different spelling: compare
    /// canonical forms across the whole baseline.
    fn lookup_by_canonical(&self, path: &Path) -> Option<String> {
        let canonical = normalize(&path.canonicalize().ok()?);
        let all = self.baseline.load_all().ok()?;
        for (stored, hash) in all {
            let stored_canonical = Path::new(&stored).canonicalize().ok();
            if stored_canonical.map(|c| normalize(&c) == canonical).unwrap_or(false) {
                return Some(hash);
            }
        }
        None
    }

    // ── restore ─────────────────────────────────────────────────────────

    /// Roll `path` back to its shadow copy. Manual restores skip the alert
    /// and the anti-clobber hold. Absence of a shadow fails silently.
    pub async fn restore_from_shadow(self: &Arc<Self>, path: &Path, manual: bool) -> bool {
        let Some(data) = self.shadow.restore_bytes(path) else {
            debug!(path = %path.display(), "no shadow copy; restore skipped");
            return false;
        };
        if !manual {
            info!(path = %path.display(), "attempting rollback");
        }

        let engine = self.clone();
        let alert_path = path.to_path_buf();
        let on_written = move || {
            if !manual {
                engine.send_alert(&alert_path, THREAT_LABEL);
            }
        };
        let restored = restore::write_back(path, &data, !manual, on_written).await;

        if restored && !self.is_maintenance() {
            self.log_incident(format!("Restored: {}", path.display()), RiskLevel::Recovery);
        }
        restored
    }

    /// Operator-initiated rollback of every baselined path. Event handling
    /// is latched off for the duration and re-enabled unconditionally.
    pub async fn force_restore_all(self: &Arc<Self>) -> usize {
        info!("maintenance mode enabled; events suppressed");
        self.maintenance.store(true, Ordering::SeqCst);
        tokio::time::sleep(MAINTENANCE_QUIESCE).await;

        let mut count = 0;
        match self.baseline.load_all() {
            Ok(all) => {
                for path in all.keys() {
                    if self.restore_from_shadow(Path::new(path), true).await {
                        count += 1;
                        debug!(path = %path, "restored");
                    }
                }
            }
            Err(e) => warn!(error = %e, "cannot enumerate baseline for restore"),
        }

        self.maintenance.store(false, Ordering::SeqCst);
        info!(count, "maintenance mode cleared; monitoring active");
        count
    }

    // ── alerts / UI ─────────────────────────────────────────────────────

    fn send_alert(&self, path: &Path, threat: &str) {
        let recipient = {
            let settings = self.settings.read();
            settings.alert_recipient().map(str::to_string)
        };
        let Some(recipient) = recipient else { return };
        let alert = Alert::for_threat(&recipient, path, threat);
        let sink = self.alert_sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.dispatch(alert) {
                warn!(error = %e, "alert delivery failed");
            }
        });
    }

    fn notify_ui(&self) {
        if let Some(callback) = &self.ui_callback {
            callback();
        }
    }

    fn log_incident(&self, details: String, risk: RiskLevel) {
        if !self.settings.read().save_logs {
            return;
        }
        if let Err(e) = self.audit.log_incident(&details, risk) {
            warn!(error = %e, "audit append failed");
        }
    }

    // ── relevance ───────────────────────────────────────────────────────

    fn is_relevant(&self, path: &Path) -> bool {
        let event_norm = normalize(path);
        self.targets.read().iter().any(|target| {
            if target.is_dir() {
                event_norm.starts_with(normalize(target))
            } else {
                event_norm == normalize(target)
            }
        })
    }

    /// A target that is not a directory counts as a file target even once
    /// the file itself is gone.
    fn covered_by_file_target(&self, path: &Path) -> bool {
        let event_norm = normalize(path);
        self.targets
            .read()
            .iter()
            .any(|target| !target.is_dir() && normalize(target) == event_norm)
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Install the watcher and trackers, then process events until
    /// [`stop`](Self::stop). Workers are abandoned on shutdown; trackers
    /// and the watcher bridge are joined.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let roots = self.watch_roots();
        if roots.is_empty() {
            warn!("no watchable roots; monitoring not started");
            return Ok(());
        }

        let mut watcher = DirWatcher::new(self.events_tx.clone())?;
        watcher.watch_roots(&roots)?;

        let file_targets: Vec<PathBuf> = self
            .targets
            .read()
            .iter()
            .filter(|t| t.is_file())
            .cloned()
            .collect();
        for target in file_targets {
            self.spawn_tracker(target).await;
        }

        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .context("engine already running")?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.running.store(true, Ordering::SeqCst);
        info!("monitoring started");

        loop {
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let trackers: Vec<RenameTracker> = {
            let mut registry = self.trackers.lock().await;
            registry.drain().map(|(_, tracker)| tracker).collect()
        };
        for tracker in trackers {
            tracker.stop().await;
        }
        watcher.shutdown();
        info!("monitoring stopped");
        Ok(())
    }

    /// Cooperative shutdown; `run` returns after draining its current event.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn spawn_tracker(self: &Arc<Self>, path: PathBuf) {
        match RenameTracker::spawn(path.clone(), self.events_tx.clone()) {
            Ok(tracker) => {
                self.trackers.lock().await.insert(path, tracker);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot start rename tracker");
            }
        }
    }

    /// One watch root per distinct parent directory of any target.
    fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots = BTreeSet::new();
        for target in self.targets.read().iter() {
            if target.is_dir() {
                roots.insert(target.clone());
            } else if let Some(parent) = target.parent() {
                roots.insert(parent.to_path_buf());
            }
        }
        roots.into_iter().collect()
    }
}

fn canonical_or(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap_or(path)
}

/// Case-insensitive component-wise comparison form.
fn normalize(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}
