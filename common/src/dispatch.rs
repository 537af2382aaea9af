//! Per-path dispatch: owner lookup, classification, admission, transfer
//!
//! [`Dispatcher::dispatch`] is the isolation boundary for a single path: every error below it is
//! logged and turned into a [`DispatchOutcome`], so one bad file never aborts a scan.

use tracing::instrument;

use crate::catalog::{Routing, StaticCatalog};
use crate::classify::{Classification, Classifier, RejectReason};
use crate::config::{MonitorSettings, TransferMode};
use crate::dedup::{Admission, DedupGuard};
use crate::dirconf::{self, ConfigError, DirectoryMap, WatchedDirectory};
use crate::executor::{TransferExecutor, TransferRequest};
use crate::history::TransferHistory;
use crate::notify::Notifier;
use crate::progress::{Progress, Summary};

/// Everything derived from one configuration load.
///
/// Shared read-only between all scheduled jobs; a reload swaps in a new snapshot as a whole.
#[derive(Debug)]
pub struct Snapshot {
    pub directories: DirectoryMap,
    pub classifier: Classifier,
    pub routing: Routing,
}

impl Snapshot {
    /// Build a snapshot from `settings`; `mode_override` replaces the global transfer mode.
    ///
    /// Lines that fail to parse are returned next to the snapshot. A specification without any
    /// usable line is an error.
    pub fn from_settings(
        settings: &MonitorSettings,
        mode_override: Option<TransferMode>,
    ) -> anyhow::Result<(Self, Vec<ConfigError>)> {
        let defaults = dirconf::Defaults {
            mode: mode_override.unwrap_or(settings.transfer_mode),
            category: settings.category,
        };
        let parsed = dirconf::parse_text(&settings.monitor_dirs, defaults).require_any()?;
        let classifier = Classifier::new(
            settings.exclude_keyword_list(),
            &settings.transfer_exclude_words,
            &settings.media_extensions,
        );
        let routing = Routing {
            auto_category: settings.auto_category,
            default_destination: settings.default_destination.clone(),
            catalog: std::sync::Arc::new(StaticCatalog::new(&settings.libraries)?),
        };
        Ok((
            Self {
                directories: parsed.directories,
                classifier,
                routing,
            },
            parsed.errors,
        ))
    }
}

/// What happened to one dispatched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Transferred {
        unit: std::path::PathBuf,
        target: std::path::PathBuf,
        bytes: u64,
    },
    Rejected(RejectReason),
    /// No watched directory contains the path
    NotWatched,
    AlreadyProcessed,
    Vanished,
    PermissionDenied,
    /// The transfer (or building its request) failed; the path stays unrecorded
    Failed(String),
}

impl DispatchOutcome {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        match self {
            DispatchOutcome::Transferred { bytes, .. } => {
                summary.transferred = 1;
                summary.bytes_transferred = *bytes;
            }
            DispatchOutcome::Rejected(_) => summary.rejected = 1,
            DispatchOutcome::NotWatched => summary.not_watched = 1,
            DispatchOutcome::AlreadyProcessed => summary.already_processed = 1,
            DispatchOutcome::Vanished => summary.vanished = 1,
            DispatchOutcome::PermissionDenied => summary.permission_denied = 1,
            DispatchOutcome::Failed(_) => summary.failed = 1,
        }
        summary
    }
}

pub struct Dispatcher {
    snapshot: std::sync::RwLock<std::sync::Arc<Snapshot>>,
    guard: DedupGuard,
    executor: std::sync::Arc<dyn TransferExecutor>,
    notifier: std::sync::Arc<dyn Notifier>,
    progress: Progress,
    refresh: bool,
}

impl Dispatcher {
    pub fn new(
        snapshot: Snapshot,
        history: std::sync::Arc<dyn TransferHistory>,
        executor: std::sync::Arc<dyn TransferExecutor>,
        notifier: std::sync::Arc<dyn Notifier>,
    ) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(std::sync::Arc::new(snapshot)),
            guard: DedupGuard::new(history),
            executor,
            notifier,
            progress: Progress::new(),
            refresh: false,
        }
    }

    /// Ask the notifier for a library refresh after every transfer.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Current configuration; callers keep using the returned snapshot even across a reload.
    pub fn snapshot(&self) -> std::sync::Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, snapshot: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = std::sync::Arc::new(snapshot);
    }

    pub fn history(&self) -> &std::sync::Arc<dyn TransferHistory> {
        self.guard.history()
    }

    pub fn notifier(&self) -> &std::sync::Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Push one candidate path through the pipeline.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, path: &std::path::Path) -> DispatchOutcome {
        let outcome = self.dispatch_inner(path).await;
        self.progress.add(&outcome.summary());
        outcome
    }

    async fn dispatch_inner(&self, path: &std::path::Path) -> DispatchOutcome {
        let snapshot = self.snapshot();
        let Some(watched) = snapshot.directories.owner_of(path) else {
            tracing::debug!("not below any watched directory");
            return DispatchOutcome::NotWatched;
        };
        let accepted = match snapshot.classifier.classify(&watched.source, path) {
            Classification::Accept(accepted) => accepted,
            Classification::Reject(reason) => {
                tracing::debug!("skipping: {}", reason);
                return DispatchOutcome::Rejected(reason);
            }
        };
        if !accepted.path.starts_with(&watched.source) {
            // disc-image marker directly inside (or above) the watched directory
            tracing::warn!(
                "disc-image root {:?} lies outside watched directory {:?}",
                accepted.path,
                watched.source
            );
            return DispatchOutcome::Rejected(RejectReason::UnresolvableDiscRoot);
        }
        let unit = accepted.path;
        let permit = match self.guard.admit(&unit).await {
            Ok(Admission::Admitted(permit)) => permit,
            Ok(Admission::AlreadyProcessed) => return DispatchOutcome::AlreadyProcessed,
            Ok(Admission::Vanished) => return DispatchOutcome::Vanished,
            Ok(Admission::PermissionDenied) => return DispatchOutcome::PermissionDenied,
            Err(error) => {
                tracing::error!("admission of {:?} failed: {:#}", unit, &error);
                return DispatchOutcome::Failed(format!("{:#}", error));
            }
        };
        // the permit stays held until the executor has recorded (or failed) the transfer
        let result = self.transfer(&snapshot, watched, &unit).await;
        drop(permit);
        match result {
            Ok(request) => {
                self.notifier.transferred(&request, self.refresh);
                DispatchOutcome::Transferred {
                    unit,
                    target: request.target,
                    bytes: request.size,
                }
            }
            Err(error) => {
                tracing::error!("{:#}", &error);
                self.notifier.transfer_failed(&unit, &error);
                DispatchOutcome::Failed(format!("{:#}", error))
            }
        }
    }

    async fn transfer(
        &self,
        snapshot: &Snapshot,
        watched: &WatchedDirectory,
        unit: &std::path::Path,
    ) -> anyhow::Result<TransferRequest> {
        let target = snapshot.routing.resolve(watched, unit)?;
        let mut request = TransferRequest::inspect(unit, watched.mode, target).await?;
        if let Some(relative) = unit
            .strip_prefix(&watched.source)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
        {
            request.relative = relative.to_path_buf();
        }
        throttle::get_dispatch_token().await;
        self.executor.execute(&request).await?;
        Ok(request)
    }
}
