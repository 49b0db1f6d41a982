//! Session controller.
//!
//! Orchestrates the fetch → parse → merge → commit cycle, owns the
//! connection to the background worker, and decides which check triggers
//! follow a refresh.
//!
//! # Refresh
//!
//! 1. Fetch the manifest into a fresh temp file next to the cache.
//! 2. Parse it. A parse failure discards the temp file; the cache is
//!    untouched.
//! 3. Merge every descriptor into the registry and mark the fetched ids as
//!    available online, every other record offline.
//! 4. Commit the temp file over the cache (atomic rename).
//! 5. Record the check time and adjust the check triggers.
//!
//! Only one refresh runs at a time; a second request fails with
//! [`SyncError::Busy`]. A fetch failure leaves the cache and the last check
//! time as they were.
//!
//! # Connection
//!
//! While no worker is connected, refresh requests are queued and run on the
//! next [`SessionController::connect`]; queries return empty results.
//! Every connect re-synchronizes from scratch.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{CheckInterval, SyncConfig};
use crate::error::SyncError;
use crate::events::EventRouter;
use crate::fetcher::{FlightGuard, ManifestFetcher, Transport};
use crate::manifest::ManifestSnapshot;
use crate::model::{UpdateRecord, UpdateStatus};
use crate::prefs::{Preferences, SessionState};
use crate::scheduler::CheckScheduler;
use crate::store::{ManifestStore, TempFileGuard};
use crate::worker::WorkerHandle;

/// Consecutive quiet manual refreshes before the lighter signal is used.
const IMPATIENCE_THRESHOLD: u32 = 3;

/// State of the link to the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// User-facing outcome of a manual refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSignal {
    UpdatesFound,
    NoUpdatesFound,
    /// Several manual refreshes in a row found nothing new
    NothingChangedAgain,
}

impl RefreshSignal {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UpdatesFound => "New updates found",
            Self::NoUpdatesFound => "No new updates found",
            Self::NothingChangedAgain => "Still nothing new, try again later",
        }
    }
}

/// Result of a refresh or cache load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshOutcome {
    /// Whether any record was seen for the first time
    pub any_new: bool,
    /// Records in the registry after the merge
    pub update_count: usize,
    /// Set for manual refreshes only
    pub signal: Option<RefreshSignal>,
    /// No worker was connected; the refresh runs on the next connect
    pub deferred: bool,
    /// Id of the newest record after the merge
    pub newest: Option<String>,
}

impl RefreshOutcome {
    fn deferred() -> Self {
        Self {
            deferred: true,
            ..Default::default()
        }
    }
}

/// Saved session state reconciled against the live registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedState {
    pub record: UpdateRecord,
    /// Status persisted before the restart, if it was readable
    pub saved_status: Option<UpdateStatus>,
}

impl ResumedState {
    /// Live status; always wins over the saved one.
    pub fn status(&self) -> UpdateStatus {
        self.record.status
    }
}

pub struct SessionController {
    config: SyncConfig,
    store: ManifestStore,
    fetcher: ManifestFetcher,
    prefs: Arc<Preferences>,
    scheduler: Arc<dyn CheckScheduler>,
    router: Arc<EventRouter>,
    worker: RwLock<Option<WorkerHandle>>,
    /// Refresh requested while disconnected; the flag is `manual`
    pending_refresh: Mutex<Option<bool>>,
    refreshing: AtomicBool,
    quiet_manual_refreshes: AtomicU32,
}

impl SessionController {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        prefs: Arc<Preferences>,
        scheduler: Arc<dyn CheckScheduler>,
        router: Arc<EventRouter>,
    ) -> Self {
        let store = ManifestStore::new(config.manifest_cache_path(), config.compatibility.clone());
        Self {
            config,
            store,
            fetcher: ManifestFetcher::new(transport),
            prefs,
            scheduler,
            router,
            worker: RwLock::new(None),
            pending_refresh: Mutex::new(None),
            refreshing: AtomicBool::new(false),
            quiet_manual_refreshes: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.worker.read().as_ref() {
            Some(handle) if handle.is_connected() => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Attach a worker and catch up with it.
    ///
    /// Runs the refresh queued while disconnected, or loads the cache (or
    /// fetches when there is none).
    pub async fn connect(&self, handle: WorkerHandle) -> Result<RefreshOutcome, SyncError> {
        *self.worker.write() = Some(handle);
        info!("Connected to update worker");

        let pending = self.pending_refresh.lock().take();
        match pending {
            Some(manual) => {
                debug!(manual, "Running refresh queued while disconnected");
                self.refresh(manual).await
            }
            None => self.get_cached_or_refresh().await,
        }
    }

    pub fn disconnect(&self) {
        if self.worker.write().take().is_some() {
            info!("Disconnected from update worker");
        }
    }

    /// Read the saved session state and clear it.
    ///
    /// Called once at the start of every foreground session.
    pub async fn begin_session(&self) -> Result<SessionState, SyncError> {
        let saved = self.prefs.take_session_state().await?;
        if !saved.is_empty() {
            debug!(id = ?saved.active_id, status = ?saved.active_status_name, "Read saved session state");
        }
        Ok(saved)
    }

    /// Reconcile `saved` against the live registry without fetching.
    ///
    /// Returns `None` when nothing was saved, the record no longer exists,
    /// or no worker is connected.
    pub async fn resume(&self, saved: &SessionState) -> Result<Option<ResumedState>, SyncError> {
        let Some(id) = saved.active_id.as_deref() else {
            return Ok(None);
        };
        let Some(record) = self.get_update(id).await? else {
            debug!(id, "Saved update is gone, nothing to resume");
            return Ok(None);
        };

        let saved_status = saved.status();
        if saved_status != Some(record.status) {
            debug!(id, saved = ?saved_status, live = %record.status, "Saved status is stale");
        }
        self.router.focus(Some(record.id.clone())).await;
        Ok(Some(ResumedState {
            record,
            saved_status,
        }))
    }

    /// Fetch the manifest and merge it.
    ///
    /// `manual` marks a user-initiated refresh, which yields a
    /// [`RefreshSignal`].
    pub async fn refresh(&self, manual: bool) -> Result<RefreshOutcome, SyncError> {
        let Some(worker) = self.worker() else {
            self.queue_refresh(manual);
            return Ok(RefreshOutcome::deferred());
        };

        let _guard = FlightGuard::acquire(&self.refreshing).ok_or_else(|| {
            debug!(manual, "Refresh rejected, another refresh is in progress");
            SyncError::Busy
        })?;

        let url = &self.config.manifest_url;
        info!(url = %url, manual, "Checking for updates");
        let temp = match self.store.prepare_temp_path() {
            Ok(temp) => temp,
            Err(e) => return Err(self.refresh_failed(manual, e)),
        };
        // Committing renames the file away, leaving nothing to remove.
        let _cleanup = TempFileGuard::new(&temp);

        if let Err(e) = self.fetcher.fetch(url, &temp).await {
            return Err(self.refresh_failed(manual, e));
        }

        match self.apply_fetched(&worker, &temp, manual).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::Disconnected) => {
                self.worker_lost();
                self.queue_refresh(manual);
                Ok(RefreshOutcome::deferred())
            }
            Err(e) => Err(self.refresh_failed(manual, e)),
        }
    }

    /// Merge the durable cache, fetching only when there is none.
    ///
    /// A corrupt cache is treated as missing, never as "no updates".
    pub async fn get_cached_or_refresh(&self) -> Result<RefreshOutcome, SyncError> {
        let Some(worker) = self.worker() else {
            return Ok(RefreshOutcome::deferred());
        };

        match self.store.read_cached() {
            Ok(Some(snapshot)) => {
                let result = self.merge(&worker, &snapshot, false).await;
                if let Err(SyncError::Disconnected) = result {
                    self.worker_lost();
                    return Ok(RefreshOutcome::deferred());
                }
                debug!(updates = snapshot.len(), "Cached manifest merged");
                result
            }
            Ok(None) => self.refresh(false).await,
            Err(e) => {
                warn!(error = %e, "Cached manifest unusable, fetching a new one");
                self.refresh(false).await
            }
        }
    }

    /// Cancel the outstanding fetch; returns whether one was running.
    pub fn cancel_refresh(&self) -> bool {
        self.fetcher.cancel()
    }

    /// Effective periodic check interval.
    pub async fn check_interval(&self) -> CheckInterval {
        self.prefs
            .check_interval()
            .await
            .unwrap_or(self.config.check_interval)
    }

    /// Persist a new interval and reinstall the periodic trigger.
    pub async fn set_check_interval(&self, interval: CheckInterval) -> Result<(), SyncError> {
        self.prefs.set_check_interval(interval).await?;
        match interval.period() {
            Some(period) => self.scheduler.install_repeating(period),
            None => {
                self.scheduler.cancel_repeating();
                self.scheduler.cancel_one_shot();
            }
        }
        info!(interval = %interval, "Update check interval changed");
        Ok(())
    }

    /// Install the periodic trigger for the effective interval, if enabled.
    pub async fn schedule_periodic_checks(&self) {
        match self.check_interval().await.period() {
            Some(period) => self.scheduler.install_repeating(period),
            None => self.scheduler.cancel_repeating(),
        }
    }

    pub async fn last_check(&self) -> Option<DateTime<Utc>> {
        self.prefs.last_check().await
    }

    /// Every record, newest first; empty while disconnected.
    pub async fn get_updates(&self) -> Result<Vec<UpdateRecord>, SyncError> {
        let Some(worker) = self.worker() else {
            return Ok(Vec::new());
        };
        self.or_lost(worker.get_updates().await, Vec::new())
    }

    pub async fn get_update(&self, id: &str) -> Result<Option<UpdateRecord>, SyncError> {
        let Some(worker) = self.worker() else {
            return Ok(None);
        };
        self.or_lost(worker.get_update(id).await, None)
    }

    pub async fn delete_update(&self, id: &str) -> Result<Option<UpdateRecord>, SyncError> {
        let Some(worker) = self.worker() else {
            warn!(id, "Delete ignored, update worker not connected");
            return Ok(None);
        };
        self.or_lost(worker.delete_update(id).await, None)
    }

    /// Start installing a verified update; `false` if it could not be handed
    /// to the worker.
    pub async fn trigger_install(&self, id: &str) -> Result<bool, SyncError> {
        let Some(worker) = self.worker() else {
            warn!(id, "Install ignored, update worker not connected");
            return Ok(false);
        };
        self.or_lost(worker.trigger_install(id).await, false)
    }

    pub fn set_performance_mode(&self, enabled: bool) {
        if let Some(worker) = self.worker() {
            let result = worker.set_performance_mode(enabled);
            let _ = self.or_lost(result, ());
        }
    }

    async fn apply_fetched(
        &self,
        worker: &WorkerHandle,
        temp: &std::path::Path,
        manual: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        let snapshot = self.store.parse_file(temp)?;
        let previous = match self.store.read_cached() {
            Ok(previous) => previous,
            Err(e) => {
                debug!(error = %e, "Previous manifest unreadable");
                None
            }
        };

        let outcome = self.merge(worker, &snapshot, manual).await?;
        self.store.commit(temp)?;

        if let Err(e) = self.prefs.set_last_check(Utc::now()).await {
            warn!(error = %e, "Could not record update check time");
        }

        let interval = self.check_interval().await;
        if let (Some(previous), Some(period)) = (previous, interval.period()) {
            if snapshot.has_new_entries_since(&previous) {
                debug!("Manifest gained new entries, rescheduling periodic check");
                self.scheduler.install_repeating(period);
            }
        }
        self.scheduler.cancel_one_shot();

        info!(
            updates = outcome.update_count,
            any_new = outcome.any_new,
            "Update check complete"
        );
        Ok(outcome)
    }

    async fn merge(
        &self,
        worker: &WorkerHandle,
        snapshot: &ManifestSnapshot,
        manual: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        let mut any_new = false;
        for descriptor in snapshot.descriptors() {
            any_new |= worker
                .add_update(UpdateRecord::from_descriptor(descriptor))
                .await?;
        }
        worker
            .set_updates_available_online(snapshot.ids(), true)
            .await?;

        let updates = worker.get_updates().await?;
        let newest = updates.first().map(|record| record.id.clone());
        if newest.is_some() {
            self.router.focus(newest.clone()).await;
        }

        Ok(RefreshOutcome {
            any_new,
            update_count: updates.len(),
            signal: manual.then(|| self.manual_signal(any_new)),
            deferred: false,
            newest,
        })
    }

    fn manual_signal(&self, any_new: bool) -> RefreshSignal {
        if any_new {
            self.quiet_manual_refreshes.store(0, Ordering::SeqCst);
            return RefreshSignal::UpdatesFound;
        }
        let quiet = self.quiet_manual_refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if quiet >= IMPATIENCE_THRESHOLD {
            RefreshSignal::NothingChangedAgain
        } else {
            RefreshSignal::NoUpdatesFound
        }
    }

    fn refresh_failed(&self, manual: bool, error: SyncError) -> SyncError {
        if error.is_user_visible() {
            warn!(manual, error = %error, "Update check failed");
            if !manual {
                self.scheduler.install_one_shot();
            }
        } else {
            debug!(manual, error = %error, "Update check stopped");
        }
        error
    }

    fn queue_refresh(&self, manual: bool) {
        let mut pending = self.pending_refresh.lock();
        let manual = manual || pending.unwrap_or(false);
        *pending = Some(manual);
        debug!(manual, "Update worker not connected, refresh queued");
    }

    fn worker(&self) -> Option<WorkerHandle> {
        self.worker
            .read()
            .as_ref()
            .filter(|handle| handle.is_connected())
            .cloned()
    }

    fn worker_lost(&self) {
        if self.worker.write().take().is_some() {
            warn!("Update worker went away");
        }
    }

    fn or_lost<T>(&self, result: Result<T, SyncError>, fallback: T) -> Result<T, SyncError> {
        match result {
            Err(SyncError::Disconnected) => {
                self.worker_lost();
                Ok(fallback)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::manifest_json;
    use crate::worker::{InstallEngine, StatusReporter, UpdateWorker};
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves whatever body is currently set; `None` fails the fetch.
    #[derive(Default)]
    struct StubTransport {
        body: Mutex<Option<String>>,
        calls: AtomicU32,
    }

    impl StubTransport {
        fn serve(&self, body: Option<String>) {
            *self.body.lock() = body;
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.body.lock().clone();
            match body {
                Some(body) => {
                    tokio::fs::write(dest, body).await?;
                    Ok(())
                }
                None => Err(SyncError::TransportFailure("unreachable".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingScheduler {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl CheckScheduler for RecordingScheduler {
        fn install_repeating(&self, interval: Duration) {
            self.calls.lock().push(format!("repeating:{}", interval.as_secs()));
        }

        fn cancel_repeating(&self) {
            self.calls.lock().push("cancel_repeating".to_string());
        }

        fn install_one_shot(&self) {
            self.calls.lock().push("one_shot".to_string());
        }

        fn cancel_one_shot(&self) {
            self.calls.lock().push("cancel_one_shot".to_string());
        }
    }

    struct IdleEngine;

    impl InstallEngine for IdleEngine {
        fn trigger_install(&self, _record: UpdateRecord, _reporter: StatusReporter) {}

        fn set_performance_mode(&self, _enabled: bool) {}
    }

    struct Fixture {
        _dir: TempDir,
        transport: Arc<StubTransport>,
        scheduler: Arc<RecordingScheduler>,
        controller: SessionController,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig {
            cache_dir: Some(dir.path().join("cache")),
            data_dir: Some(dir.path().join("data")),
            check_interval: CheckInterval::Daily,
            ..Default::default()
        };
        let prefs = Arc::new(Preferences::load(config.preferences_path()).unwrap());
        let transport = Arc::new(StubTransport::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let router = Arc::new(EventRouter::new(prefs.clone()));
        let controller = SessionController::new(
            config,
            transport.clone(),
            prefs,
            scheduler.clone(),
            router,
        );
        Fixture {
            _dir: dir,
            transport,
            scheduler,
            controller,
        }
    }

    fn connect_worker() -> WorkerHandle {
        let (handle, _events, _task) = UpdateWorker::spawn(Arc::new(IdleEngine));
        handle
    }

    const DAY: u64 = 24 * 60 * 60;

    /// Writes part of the manifest and then never finishes.
    struct StallingTransport;

    #[async_trait]
    impl Transport for StallingTransport {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), SyncError> {
            tokio::fs::write(dest, "{\"response\": [").await?;
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_refresh_creates_cache_dir() {
        let f = fixture();
        let cache_dir = f.controller.store().path().parent().unwrap().to_path_buf();
        assert!(!cache_dir.exists());
        f.transport.serve(Some(manifest_json(&[("u1", 100)])));

        f.controller.connect(connect_worker()).await.unwrap();
        let outcome = f.controller.refresh(true).await.unwrap();

        assert_eq!(outcome.update_count, 1);
        assert!(f.controller.store().exists());
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_refresh_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig {
            cache_dir: Some(dir.path().join("cache")),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        let prefs = Arc::new(Preferences::load(config.preferences_path()).unwrap());
        let router = Arc::new(EventRouter::new(prefs.clone()));
        let controller = SessionController::new(
            config,
            Arc::new(StallingTransport),
            prefs,
            Arc::new(RecordingScheduler::default()),
            router,
        );
        *controller.worker.write() = Some(connect_worker());

        let stalled = tokio::time::timeout(Duration::from_millis(50), controller.refresh(true)).await;
        assert!(stalled.is_err());

        let cache_dir = dir.path().join("cache");
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);
        assert!(!controller.fetcher.is_busy());
        assert!(!controller.refreshing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_impatience_signal_after_three_quiet_refreshes() {
        let f = fixture();
        f.transport.serve(Some(manifest_json(&[("u1", 100)])));
        f.controller.connect(connect_worker()).await.unwrap();

        let mut signals = Vec::new();
        for _ in 0..4 {
            signals.push(f.controller.refresh(true).await.unwrap().signal);
        }
        assert_eq!(
            signals,
            vec![
                Some(RefreshSignal::NoUpdatesFound),
                Some(RefreshSignal::NoUpdatesFound),
                Some(RefreshSignal::NothingChangedAgain),
                Some(RefreshSignal::NothingChangedAgain),
            ]
        );

        f.transport.serve(Some(manifest_json(&[("u1", 100), ("u2", 200)])));
        let outcome = f.controller.refresh(true).await.unwrap();
        assert_eq!(outcome.signal, Some(RefreshSignal::UpdatesFound));
        assert_eq!(outcome.newest.as_deref(), Some("u2"));

        f.transport.serve(Some(manifest_json(&[("u1", 100), ("u2", 200)])));
        let outcome = f.controller.refresh(true).await.unwrap();
        assert_eq!(outcome.signal, Some(RefreshSignal::NoUpdatesFound));
    }

    #[tokio::test]
    async fn test_automatic_refresh_has_no_signal() {
        let f = fixture();
        f.transport.serve(Some(manifest_json(&[("u1", 100)])));
        let outcome = f.controller.connect(connect_worker()).await.unwrap();
        assert!(outcome.any_new);
        assert_eq!(outcome.signal, None);
    }

    #[tokio::test]
    async fn test_new_entries_reschedule_periodic_check() {
        let f = fixture();
        f.transport.serve(Some(manifest_json(&[("u1", 100)])));
        f.controller.connect(connect_worker()).await.unwrap();
        // First fetch had no previous cache to compare against
        assert_eq!(f.scheduler.take(), vec!["cancel_one_shot"]);

        f.controller.refresh(false).await.unwrap();
        assert_eq!(f.scheduler.take(), vec!["cancel_one_shot"]);

        f.transport.serve(Some(manifest_json(&[("u1", 100), ("u2", 200)])));
        f.controller.refresh(false).await.unwrap();
        assert_eq!(
            f.scheduler.take(),
            vec![format!("repeating:{}", DAY), "cancel_one_shot".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_automatic_refresh_installs_retry() {
        let f = fixture();
        f.transport.serve(None);
        let err = f.controller.connect(connect_worker()).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportFailure(_)));
        assert_eq!(f.scheduler.take(), vec!["one_shot"]);

        let err = f.controller.refresh(true).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportFailure(_)));
        assert!(f.scheduler.take().is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_on_automatic_refresh_installs_retry() {
        let f = fixture();
        f.transport.serve(Some("<html>maintenance</html>".to_string()));
        let err = f.controller.connect(connect_worker()).await.unwrap_err();
        assert!(matches!(err, SyncError::ParseError(_)));
        assert_eq!(f.scheduler.take(), vec!["one_shot"]);
        assert!(!f.controller.store().exists());
    }

    #[tokio::test]
    async fn test_disabling_checks_cancels_triggers() {
        let f = fixture();
        f.controller
            .set_check_interval(CheckInterval::Weekly)
            .await
            .unwrap();
        assert_eq!(f.scheduler.take(), vec![format!("repeating:{}", 7 * DAY)]);
        assert_eq!(f.controller.check_interval().await, CheckInterval::Weekly);

        f.controller
            .set_check_interval(CheckInterval::Never)
            .await
            .unwrap();
        assert_eq!(f.scheduler.take(), vec!["cancel_repeating", "cancel_one_shot"]);
        assert_eq!(f.controller.check_interval().await, CheckInterval::Never);
    }

    #[tokio::test]
    async fn test_queries_while_disconnected_are_empty() {
        let f = fixture();
        assert_eq!(f.controller.connection_state(), ConnectionState::Disconnected);
        assert!(f.controller.get_updates().await.unwrap().is_empty());
        assert!(f.controller.get_update("u1").await.unwrap().is_none());
        assert!(!f.controller.trigger_install("u1").await.unwrap());
        assert!(f.controller.get_cached_or_refresh().await.unwrap().deferred);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_worker_is_treated_as_disconnected() {
        let f = fixture();
        f.transport.serve(Some(manifest_json(&[("u1", 100)])));
        let (handle, _events, task) = UpdateWorker::spawn(Arc::new(IdleEngine));
        f.controller.connect(handle.clone()).await.unwrap();
        assert_eq!(f.controller.connection_state(), ConnectionState::Connected);

        handle.shutdown();
        task.await.unwrap();

        assert_eq!(f.controller.connection_state(), ConnectionState::Disconnected);
        assert!(f.controller.get_updates().await.unwrap().is_empty());
        assert!(f.controller.refresh(true).await.unwrap().deferred);
    }
}
