//! Admission control: a source path is transferred at most once
//!
//! The check "is this path in the history?" and the act "transfer it and record it" must be one
//! atomic step, otherwise two overlapping scans of the same new file can both pass the lookup
//! before either has recorded its transfer. [`DedupGuard::admit`] therefore returns a
//! [`Permit`] that keeps the path locked until the caller drops it, after the transfer (and the
//! history write it performs) has finished.
//!
//! Locks are per unit path (the collapsed root for disc images), so unrelated files are admitted
//! and transferred concurrently.

use tracing::instrument;

use crate::history::TransferHistory;

type PathLock = std::sync::Arc<tokio::sync::Mutex<()>>;

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// The caller owns the path until the permit is dropped
    Admitted(Permit),
    /// The path has a history record
    AlreadyProcessed,
    /// The path disappeared between discovery and admission
    Vanished,
    /// The path exists but cannot be inspected
    PermissionDenied,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Exclusive ownership of one unit path; releases the path lock on drop.
#[derive(Debug)]
pub struct Permit {
    path: std::path::PathBuf,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    locks: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<std::path::PathBuf, PathLock>>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // the map holds one reference, anything above that is a waiter
        if locks
            .get(&self.path)
            .is_some_and(|lock| std::sync::Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.path);
        }
    }
}

pub struct DedupGuard {
    history: std::sync::Arc<dyn TransferHistory>,
    locks: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<std::path::PathBuf, PathLock>>>,
}

impl std::fmt::Debug for DedupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupGuard")
            .field("locked_paths", &self.locked_paths())
            .finish()
    }
}

impl DedupGuard {
    pub fn new(history: std::sync::Arc<dyn TransferHistory>) -> Self {
        Self {
            history,
            locks: Default::default(),
        }
    }

    pub fn history(&self) -> &std::sync::Arc<dyn TransferHistory> {
        &self.history
    }

    /// Number of unit paths currently locked or waited on.
    pub fn locked_paths(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn path_lock(&self, path: &std::path::Path) -> PathLock {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Try to take ownership of the unit `path`.
    ///
    /// Waits while another caller holds the same path, then re-checks the history, so at most
    /// one caller is ever admitted for a path that ends up recorded.
    #[instrument(skip(self))]
    pub async fn admit(&self, path: &std::path::Path) -> anyhow::Result<Admission> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("path vanished before admission");
                return Ok(Admission::Vanished);
            }
            Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("cannot inspect {:?}: {}", path, error);
                return Ok(Admission::PermissionDenied);
            }
            Err(error) => {
                return Err(anyhow::Error::new(error).context(format!("cannot inspect {:?}", path)));
            }
        }
        let guard = self.path_lock(path).lock_owned().await;
        let permit = Permit {
            path: path.to_path_buf(),
            guard: Some(guard),
            locks: self.locks.clone(),
        };
        if let Some(record) = self.history.find_by_src(path)? {
            tracing::info!("already processed on {}", record.date);
            return Ok(Admission::AlreadyProcessed);
        }
        // a concurrent move may have taken the file while we waited for the lock
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Admission::Vanished);
        }
        Ok(Admission::Admitted(permit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use crate::history::{MemoryHistory, TransferRecord};
    use tracing_test::traced_test;

    fn record(path: &std::path::Path) -> TransferRecord {
        TransferRecord {
            src: path.to_path_buf(),
            dest: "/dst".into(),
            mode: TransferMode::Copy,
            date: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn admits_once_after_record() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let file = tmp_dir.path().join("movie.mkv");
        tokio::fs::write(&file, "data").await?;
        let history = std::sync::Arc::new(MemoryHistory::new());
        let guard = DedupGuard::new(history.clone());
        let admission = guard.admit(&file).await?;
        assert!(admission.is_admitted());
        history.record(record(&file))?;
        drop(admission);
        assert!(matches!(guard.admit(&file).await?, Admission::AlreadyProcessed));
        assert_eq!(guard.locked_paths(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unrecorded_permit_allows_retry() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let file = tmp_dir.path().join("movie.mkv");
        tokio::fs::write(&file, "data").await?;
        let guard = DedupGuard::new(std::sync::Arc::new(MemoryHistory::new()));
        drop(guard.admit(&file).await?);
        assert!(guard.admit(&file).await?.is_admitted());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unsearchable_parent_is_permission_denied() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let tmp_dir = tempfile::tempdir()?;
        let private = tmp_dir.path().join("private");
        let file = private.join("movie.mkv");
        tokio::fs::create_dir(&private).await?;
        tokio::fs::write(&file, "data").await?;
        tokio::fs::set_permissions(&private, std::fs::Permissions::from_mode(0o000)).await?;
        // permission bits do not apply to root
        let enforced = std::fs::symlink_metadata(&file).is_err();
        let history = std::sync::Arc::new(MemoryHistory::new());
        let guard = DedupGuard::new(history);
        let admission = guard.admit(&file).await;
        tokio::fs::set_permissions(&private, std::fs::Permissions::from_mode(0o700)).await?;
        if !enforced {
            return Ok(());
        }
        assert!(matches!(admission?, Admission::PermissionDenied));
        assert_eq!(guard.locked_paths(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_path_is_vanished() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let guard = DedupGuard::new(std::sync::Arc::new(MemoryHistory::new()));
        assert!(matches!(
            guard.admit(&tmp_dir.path().join("gone.mkv")).await?,
            Admission::Vanished
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn concurrent_admission_is_exclusive() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let file = tmp_dir.path().join("movie.mkv");
        tokio::fs::write(&file, "data").await?;
        let history = std::sync::Arc::new(MemoryHistory::new());
        let guard = std::sync::Arc::new(DedupGuard::new(history.clone()));
        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let history = history.clone();
            let file = file.clone();
            join_set.spawn(async move {
                match guard.admit(&file).await? {
                    Admission::Admitted(_permit) => {
                        tokio::task::yield_now().await;
                        history.record(record(&file))?;
                        Ok::<_, anyhow::Error>(true)
                    }
                    _ => Ok(false),
                }
            });
        }
        let mut admitted = 0;
        while let Some(res) = join_set.join_next().await {
            if res?? {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(guard.locked_paths(), 0);
        Ok(())
    }
}
