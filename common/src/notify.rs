//! Notification hook for sync and transfer events

use crate::executor::TransferRequest;
use crate::progress::Summary;

pub trait Notifier: Send + Sync {
    fn sync_started(&self, kind: &str, directories: usize);
    fn sync_finished(&self, kind: &str, summary: &Summary, failed_directories: usize);
    /// `refresh` asks the receiver to refresh the media library the target landed in
    fn transferred(&self, request: &TransferRequest, refresh: bool);
    fn transfer_failed(&self, path: &std::path::Path, error: &anyhow::Error);
}

/// Emits every event as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn sync_started(&self, kind: &str, directories: usize) {
        tracing::info!("{} started over {} directories", kind, directories);
    }

    fn sync_finished(&self, kind: &str, summary: &Summary, failed_directories: usize) {
        tracing::info!(
            "{} finished: {} transferred ({}), {} failed, {} directories unreadable",
            kind,
            summary.transferred,
            bytesize::ByteSize(summary.bytes_transferred),
            summary.failed,
            failed_directories
        );
    }

    fn transferred(&self, request: &TransferRequest, refresh: bool) {
        tracing::info!(
            "{} {} -> {:?}{}",
            request.mode,
            request.name,
            request.target,
            if refresh { " (library refresh requested)" } else { "" }
        );
    }

    fn transfer_failed(&self, path: &std::path::Path, error: &anyhow::Error) {
        tracing::warn!("transfer of {:?} failed: {:#}", path, error);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn sync_started(&self, _kind: &str, _directories: usize) {}
    fn sync_finished(&self, _kind: &str, _summary: &Summary, _failed_directories: usize) {}
    fn transferred(&self, _request: &TransferRequest, _refresh: bool) {}
    fn transfer_failed(&self, _path: &std::path::Path, _error: &anyhow::Error) {}
}

/// Notifier selected by the `notify` setting.
pub fn from_settings(notify: bool) -> std::sync::Arc<dyn Notifier> {
    if notify {
        std::sync::Arc::new(LogNotifier)
    } else {
        std::sync::Arc::new(NoopNotifier)
    }
}
