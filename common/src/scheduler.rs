//! Full resync and incremental scan, on demand or on timers
//!
//! The scheduler owns a generation token: periodic timers and pending delayed dispatches all
//! belong to the current generation. [`Scheduler::drain`] cancels the generation (removing every
//! pending job) and starts a new one; dispatches that already started run to completion.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::config::MonitorSettings;
use crate::dispatch::{Dispatcher, Snapshot};
use crate::progress::Summary;
use crate::scan;

/// Delay before the start-up resync requested by `run_once`.
pub const RUN_ONCE_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// Timer and window settings of one configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub enabled: bool,
    pub run_once: bool,
    pub delay: std::time::Duration,
    pub full_sync_interval: std::time::Duration,
    pub scan_interval: std::time::Duration,
    pub recent_window: std::time::Duration,
    pub history_window: std::time::Duration,
}

impl Schedule {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            enabled: settings.enabled,
            run_once: settings.run_once,
            delay: settings.delay,
            full_sync_interval: settings.full_sync_interval,
            scan_interval: settings.scan_interval,
            recent_window: settings.recent_window,
            history_window: settings.history_window,
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::from_settings(&MonitorSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFailure {
    pub source: std::path::PathBuf,
    pub error: String,
}

impl std::fmt::Display for DirectoryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.source, self.error)
    }
}

/// Result of one full resync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub directories: usize,
    pub summary: Summary,
    pub failures: Vec<DirectoryFailure>,
    /// Stopped early because of a drain or shutdown
    pub interrupted: bool,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.summary.failed == 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "directories: {}", self.directories)?;
        write!(f, "{}", self.summary)?;
        for failure in &self.failures {
            writeln!(f, "unreadable: {}", failure)?;
        }
        if self.interrupted {
            writeln!(f, "interrupted")?;
        }
        Ok(())
    }
}

/// Result of one incremental scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub directories: usize,
    /// Candidates found (recent and not yet in history)
    pub candidates: usize,
    /// Candidates turned into delayed jobs
    pub scheduled: usize,
    /// Outcome counts of candidates dispatched right away
    pub summary: Summary,
    pub failures: Vec<DirectoryFailure>,
}

impl std::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "directories: {}", self.directories)?;
        writeln!(f, "candidates: {}", self.candidates)?;
        writeln!(f, "scheduled: {}", self.scheduled)?;
        if self.summary.dispatched() > 0 {
            write!(f, "{}", self.summary)?;
        }
        for failure in &self.failures {
            writeln!(f, "unreadable: {}", failure)?;
        }
        Ok(())
    }
}

/// A delayed dispatch waiting for its due time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub id: u64,
    pub path: std::path::PathBuf,
    pub due: tokio::time::Instant,
}

type PendingJobs = std::sync::Arc<std::sync::Mutex<std::collections::HashMap<u64, PendingJob>>>;

/// Handle to the scheduling state; clones share it.
#[derive(Clone)]
pub struct Scheduler {
    dispatcher: std::sync::Arc<Dispatcher>,
    schedule: std::sync::Arc<std::sync::Mutex<Schedule>>,
    generation: std::sync::Arc<std::sync::Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    pending: PendingJobs,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
    requested_sync: std::sync::Arc<std::sync::atomic::AtomicBool>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(dispatcher: std::sync::Arc<Dispatcher>, schedule: Schedule) -> Self {
        Self {
            dispatcher,
            schedule: std::sync::Arc::new(std::sync::Mutex::new(schedule)),
            generation: std::sync::Arc::new(std::sync::Mutex::new(CancellationToken::new())),
            shutdown: CancellationToken::new(),
            pending: Default::default(),
            next_id: Default::default(),
            requested_sync: Default::default(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn dispatcher(&self) -> &std::sync::Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn schedule(&self) -> Schedule {
        *self
            .schedule
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn generation(&self) -> CancellationToken {
        self.generation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn interrupted(&self, token: &CancellationToken) -> bool {
        token.is_cancelled() || self.is_stopped()
    }

    /// Pending delayed jobs, earliest first.
    pub fn pending(&self) -> Vec<PendingJob> {
        let mut jobs: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.due, job.id));
        jobs
    }

    /// Start the timers of the current schedule in the current generation.
    ///
    /// With `enabled` the full resync and the incremental scan run periodically; with
    /// `run_once` a single full resync runs shortly after start.
    pub fn start(&self) {
        if self.is_stopped() {
            tracing::warn!("scheduler is stopped, not starting timers");
            return;
        }
        let schedule = self.schedule();
        let token = self.generation();
        if schedule.enabled {
            tracing::info!(
                "full resync every {}, incremental scan every {}",
                humantime::format_duration(schedule.full_sync_interval),
                humantime::format_duration(schedule.scan_interval)
            );
            let scheduler = self.clone();
            let full_token = token.clone();
            self.tracker.spawn(async move {
                let period = schedule.full_sync_interval;
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = full_token.cancelled() => break,
                        _ = interval.tick() => {
                            let report = scheduler.sync_with(&full_token).await;
                            tracing::info!("periodic full resync done:\n{}", report);
                        }
                    }
                }
            });
            let scheduler = self.clone();
            let scan_token = token.clone();
            self.tracker.spawn(async move {
                let period = schedule.scan_interval;
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = scan_token.cancelled() => break,
                        _ = interval.tick() => {
                            let report = scheduler.scan_with(&scan_token, false).await;
                            tracing::debug!("incremental scan done:\n{}", report);
                        }
                    }
                }
            });
        }
        if schedule.run_once {
            tracing::info!(
                "running a full resync in {}",
                humantime::format_duration(RUN_ONCE_DELAY)
            );
            let scheduler = self.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(RUN_ONCE_DELAY) => {
                        let report = scheduler.sync_with(&token).await;
                        tracing::info!("start-up full resync done:\n{}", report);
                    }
                }
            });
        }
    }

    /// Full resync of every watched directory ("sync now").
    pub async fn sync_all(&self) -> SyncReport {
        let token = self.shutdown.child_token();
        self.sync_with(&token).await
    }

    /// Start a full resync in the background, next to whatever the timers are doing.
    ///
    /// Returns false when the scheduler is stopped or a requested resync is still running.
    pub fn request_sync(&self) -> bool {
        if self.is_stopped() {
            tracing::warn!("scheduler is stopped, ignoring resync request");
            return false;
        }
        if self
            .requested_sync
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            tracing::info!("requested full resync is still running");
            return false;
        }
        let scheduler = self.clone();
        self.tracker.spawn(async move {
            let report = scheduler.sync_all().await;
            scheduler
                .requested_sync
                .store(false, std::sync::atomic::Ordering::Release);
            tracing::info!("requested full resync done:\n{}", report);
        });
        true
    }

    /// One incremental scan; candidates become delayed jobs unless `immediate` is set.
    pub async fn scan_recent(&self, immediate: bool) -> ScanReport {
        let token = self.generation();
        self.scan_with(&token, immediate).await
    }

    #[instrument(skip(self, token))]
    async fn sync_with(&self, token: &CancellationToken) -> SyncReport {
        let snapshot = self.dispatcher.snapshot();
        let notifier = self.dispatcher.notifier();
        let mut report = SyncReport {
            directories: snapshot.directories.len(),
            ..Default::default()
        };
        notifier.sync_started("full resync", report.directories);
        'directories: for watched in snapshot.directories.iter() {
            if token.is_cancelled() {
                report.interrupted = true;
                break;
            }
            tracing::info!("resyncing {:?}", watched.source);
            let candidates = match scan::list_media(&watched.source, &snapshot.classifier).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    tracing::error!("cannot scan {:?}: {:#}", watched.source, &error);
                    report.failures.push(DirectoryFailure {
                        source: watched.source.clone(),
                        error: format!("{:#}", error),
                    });
                    continue;
                }
            };
            for candidate in candidates {
                if token.is_cancelled() {
                    report.interrupted = true;
                    break 'directories;
                }
                let outcome = self.dispatcher.dispatch(&candidate.path).await;
                report.summary = report.summary + outcome.summary();
            }
        }
        notifier.sync_finished("full resync", &report.summary, report.failures.len());
        report
    }

    #[instrument(skip(self, token))]
    async fn scan_with(&self, token: &CancellationToken, immediate: bool) -> ScanReport {
        let schedule = self.schedule();
        let snapshot = self.dispatcher.snapshot();
        let mut report = ScanReport {
            directories: snapshot.directories.len(),
            ..Default::default()
        };
        let known = self.known_sources(schedule.history_window);
        let since = std::time::SystemTime::now()
            .checked_sub(schedule.recent_window)
            .unwrap_or(std::time::UNIX_EPOCH);
        for watched in snapshot.directories.iter() {
            if self.interrupted(token) {
                break;
            }
            let candidates = match scan::recent_candidates(
                &watched.source,
                &snapshot.classifier,
                since,
                &known,
            )
            .await
            {
                Ok(candidates) => candidates,
                Err(error) => {
                    tracing::warn!("cannot scan {:?}: {:#}", watched.source, &error);
                    report.failures.push(DirectoryFailure {
                        source: watched.source.clone(),
                        error: format!("{:#}", error),
                    });
                    continue;
                }
            };
            report.candidates += candidates.len();
            for path in candidates {
                if immediate {
                    if self.interrupted(token) {
                        break;
                    }
                    let outcome = self.dispatcher.dispatch(&path).await;
                    report.summary = report.summary + outcome.summary();
                } else if self.schedule_dispatch(path, schedule.delay, token) {
                    report.scheduled += 1;
                }
            }
        }
        report
    }

    /// Source paths recorded within `window`; a failing history only costs redundant jobs.
    fn known_sources(
        &self,
        window: std::time::Duration,
    ) -> std::collections::HashSet<std::path::PathBuf> {
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        match self.dispatcher.history().list_since(since) {
            Ok(records) => records.into_iter().map(|record| record.src).collect(),
            Err(error) => {
                tracing::warn!("cannot list recent history: {:#}", &error);
                Default::default()
            }
        }
    }

    /// Queue a dispatch of `path` after `delay`; false when the path is already pending.
    fn schedule_dispatch(
        &self,
        path: std::path::PathBuf,
        delay: std::time::Duration,
        token: &CancellationToken,
    ) -> bool {
        if self.interrupted(token) {
            return false;
        }
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let due = tokio::time::Instant::now() + delay;
        {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if pending.values().any(|job| job.path == path) {
                tracing::debug!("{:?} already pending", path);
                return false;
            }
            pending.insert(
                id,
                PendingJob {
                    id,
                    path: path.clone(),
                    due,
                },
            );
        }
        tracing::debug!("dispatching {:?} in {}", path, humantime::format_duration(delay));
        let scheduler = self.clone();
        let token = token.clone();
        self.tracker.spawn(async move {
            let due_now = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep_until(due) => true,
            };
            scheduler.remove_pending(id);
            if due_now && !scheduler.is_stopped() {
                scheduler.dispatcher.dispatch(&path).await;
            }
        });
        true
    }

    fn remove_pending(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
    }

    /// Cancel timers and pending jobs of the current generation and open a new one.
    ///
    /// Returns the number of pending jobs removed.
    pub fn drain(&self) -> usize {
        let old = {
            let mut generation = self
                .generation
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::replace(&mut *generation, CancellationToken::new())
        };
        old.cancel();
        let drained = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let drained = pending.len();
            pending.clear();
            drained
        };
        tracing::info!("drained {} pending jobs", drained);
        drained
    }

    /// Replace the configuration: drain, swap the snapshot, restart the timers.
    pub fn reload(&self, snapshot: Snapshot, schedule: Schedule) {
        self.drain();
        self.dispatcher.replace(snapshot);
        *self
            .schedule
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = schedule;
        self.start();
    }

    /// Wait until every timer and delayed job has finished, without cancelling anything.
    ///
    /// Only terminates once no periodic timers are running.
    pub async fn finish(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Drain all pending jobs, refuse new dispatches and wait for in-flight ones.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.drain();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchOutcome;
    use crate::history::{MemoryHistory, TransferHistory};
    use crate::notify::NoopNotifier;
    use crate::testutils::{self, RecordingExecutor};
    use tracing_test::traced_test;

    struct Fixture {
        scheduler: Scheduler,
        history: std::sync::Arc<MemoryHistory>,
        executor: std::sync::Arc<RecordingExecutor>,
    }

    fn fixture(monitor_dirs: &str, schedule: Schedule) -> Fixture {
        let settings = MonitorSettings {
            monitor_dirs: monitor_dirs.to_string(),
            exclude_keywords: "sample".to_string(),
            ..Default::default()
        };
        let (snapshot, _) = Snapshot::from_settings(&settings, None).unwrap();
        let history = std::sync::Arc::new(MemoryHistory::new());
        let executor = std::sync::Arc::new(RecordingExecutor::new(history.clone()));
        let dispatcher = std::sync::Arc::new(Dispatcher::new(
            snapshot,
            history.clone(),
            executor.clone(),
            std::sync::Arc::new(NoopNotifier),
        ));
        Fixture {
            scheduler: Scheduler::new(dispatcher, schedule),
            history,
            executor,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn full_resync_dispatches_everything_once() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = testutils::setup_media_tree(tmp_dir.path()).await?;
        let fx = fixture(&format!("{}:/library", downloads.display()), Schedule::default());
        let report = fx.scheduler.sync_all().await;
        assert!(report.is_success());
        // film, show and the disc title; the second stream is already processed
        assert_eq!(report.summary.transferred, 3);
        assert_eq!(report.summary.already_processed, 1);
        // sample.mkv and the @eaDir thumbnail
        assert_eq!(report.summary.rejected, 2);
        assert_eq!(fx.executor.calls(), 3);
        let again = fx.scheduler.sync_all().await;
        assert_eq!(again.summary.transferred, 0);
        assert_eq!(again.summary.already_processed, 4);
        assert_eq!(fx.executor.calls(), 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unreadable_directory_does_not_abort_resync() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = testutils::setup_media_tree(tmp_dir.path()).await?;
        let missing = tmp_dir.path().join("unmounted");
        let spec = format!(
            "{}:/library\n{}:/library",
            missing.display(),
            downloads.display()
        );
        let fx = fixture(&spec, Schedule::default());
        let report = fx.scheduler.sync_all().await;
        assert_eq!(report.directories, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, missing);
        assert!(!report.is_success());
        assert_eq!(report.summary.transferred, 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn incremental_scan_schedules_recent_files() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = tmp_dir.path().join("downloads");
        let old = downloads.join("Old.Film.mkv");
        let fresh = downloads.join("Fresh.Film.mkv");
        testutils::create_file(&old, "old").await?;
        testutils::create_file(&fresh, "fresh").await?;
        testutils::set_mtime_days_ago(&old, 10)?;
        testutils::set_mtime_days_ago(&fresh, 1)?;
        let fx = fixture(&format!("{}:/library", downloads.display()), Schedule::default());
        let before = tokio::time::Instant::now();
        let report = fx.scheduler.scan_recent(false).await;
        assert_eq!(report.candidates, 1);
        assert_eq!(report.scheduled, 1);
        let pending = fx.scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, fresh);
        let delay = pending[0].due - before;
        assert!(delay >= std::time::Duration::from_secs(59));
        assert!(delay <= std::time::Duration::from_secs(61));
        // not dispatched yet
        assert_eq!(fx.executor.calls(), 0);
        // a second scan does not queue the same path twice
        assert_eq!(fx.scheduler.scan_recent(false).await.scheduled, 0);
        assert_eq!(fx.scheduler.drain(), 1);
        assert!(fx.scheduler.pending().is_empty());
        fx.scheduler.stop().await;
        assert_eq!(fx.executor.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn incremental_scan_skips_recent_history() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = tmp_dir.path().join("downloads");
        let done = downloads.join("Done.mkv");
        let todo = downloads.join("Todo.mkv");
        testutils::create_file(&done, "done").await?;
        testutils::create_file(&todo, "todo").await?;
        let fx = fixture(&format!("{}:/library", downloads.display()), Schedule::default());
        fx.history
            .record(testutils::record(&done, crate::config::TransferMode::HardLink))?;
        let report = fx.scheduler.scan_recent(true).await;
        assert_eq!(report.candidates, 1);
        assert_eq!(report.scheduled, 0);
        assert_eq!(report.summary.transferred, 1);
        assert_eq!(fx.executor.requests()[0].path, todo);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn delayed_job_runs_when_due() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = tmp_dir.path().join("downloads");
        let fresh = downloads.join("Fresh.mkv");
        testutils::create_file(&fresh, "fresh").await?;
        let schedule = Schedule {
            delay: std::time::Duration::from_millis(50),
            ..Default::default()
        };
        let fx = fixture(&format!("{}:/library", downloads.display()), schedule);
        assert_eq!(fx.scheduler.scan_recent(false).await.scheduled, 1);
        fx.scheduler.finish().await;
        assert!(fx.scheduler.pending().is_empty());
        assert_eq!(fx.executor.calls(), 1);
        assert!(fx.history.find_by_src(&fresh)?.is_some());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn reload_drains_and_swaps_configuration() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let first = tmp_dir.path().join("first");
        let second = tmp_dir.path().join("second");
        testutils::create_file(&first.join("One.mkv"), "one").await?;
        testutils::create_file(&second.join("Two.mkv"), "two").await?;
        let fx = fixture(&format!("{}:/library", first.display()), Schedule::default());
        assert_eq!(fx.scheduler.scan_recent(false).await.scheduled, 1);
        let settings = MonitorSettings {
            monitor_dirs: format!("{}:/library", second.display()),
            ..Default::default()
        };
        let (snapshot, _) = Snapshot::from_settings(&settings, None)?;
        fx.scheduler
            .reload(snapshot, Schedule::from_settings(&settings));
        assert!(fx.scheduler.pending().is_empty());
        let report = fx.scheduler.sync_all().await;
        assert_eq!(report.directories, 1);
        assert_eq!(report.summary.transferred, 1);
        assert_eq!(fx.executor.requests()[0].path, second.join("Two.mkv"));
        fx.scheduler.stop().await;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn stopped_scheduler_refuses_work() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = testutils::setup_media_tree(tmp_dir.path()).await?;
        let fx = fixture(&format!("{}:/library", downloads.display()), Schedule::default());
        fx.scheduler.stop().await;
        let report = fx.scheduler.sync_all().await;
        assert!(report.interrupted);
        assert_eq!(report.summary.dispatched(), 0);
        assert_eq!(fx.scheduler.scan_recent(false).await.scheduled, 0);
        assert_eq!(fx.executor.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn requested_resync_runs_in_background() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = testutils::setup_media_tree(tmp_dir.path()).await?;
        let fx = fixture(&format!("{}:/library", downloads.display()), Schedule::default());
        assert!(fx.scheduler.request_sync());
        // coalesced with the one still running
        assert!(!fx.scheduler.request_sync());
        fx.scheduler.finish().await;
        assert_eq!(fx.executor.calls(), 3);
        assert!(fx.scheduler.request_sync());
        fx.scheduler.finish().await;
        assert_eq!(fx.executor.calls(), 3);
        fx.scheduler.stop().await;
        assert!(!fx.scheduler.request_sync());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn run_once_resyncs_after_start() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let downloads = testutils::setup_media_tree(tmp_dir.path()).await?;
        let schedule = Schedule {
            run_once: true,
            ..Default::default()
        };
        let fx = fixture(&format!("{}:/library", downloads.display()), schedule);
        fx.scheduler.start();
        fx.scheduler.finish().await;
        assert_eq!(fx.executor.calls(), 3);
        let outcome = fx
            .scheduler
            .dispatcher()
            .dispatch(&downloads.join("Show.S01E01.mp4"))
            .await;
        assert_eq!(outcome, DispatchOutcome::AlreadyProcessed);
        Ok(())
    }
}
