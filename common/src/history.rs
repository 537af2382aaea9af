//! Transfer history: the durable record of source paths that were already transferred
//!
//! A source path with a [`TransferRecord`] is never transferred again. Records are written only
//! after a successful transfer.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub src: std::path::PathBuf,
    pub dest: std::path::PathBuf,
    pub mode: crate::config::TransferMode,
    pub date: chrono::DateTime<chrono::Utc>,
}

pub trait TransferHistory: Send + Sync {
    fn find_by_src(&self, src: &std::path::Path) -> anyhow::Result<Option<TransferRecord>>;
    /// Records dated at or after `since`
    fn list_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<TransferRecord>>;
    fn record(&self, record: TransferRecord) -> anyhow::Result<()>;
}

/// History kept in process memory only.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: std::sync::Mutex<std::collections::HashMap<std::path::PathBuf, TransferRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashMap<std::path::PathBuf, TransferRecord>>
    {
        // a panic while holding the lock cannot leave the map half-updated
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn since(&self, since: chrono::DateTime<chrono::Utc>) -> Vec<TransferRecord> {
        self.lock()
            .values()
            .filter(|record| record.date >= since)
            .cloned()
            .collect()
    }
}

impl TransferHistory for MemoryHistory {
    fn find_by_src(&self, src: &std::path::Path) -> anyhow::Result<Option<TransferRecord>> {
        Ok(self.lock().get(src).cloned())
    }

    fn list_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<TransferRecord>> {
        Ok(self.since(since))
    }

    fn record(&self, record: TransferRecord) -> anyhow::Result<()> {
        self.lock().insert(record.src.clone(), record);
        Ok(())
    }
}

/// Append-only JSON-lines history file, indexed in memory.
#[derive(Debug)]
pub struct JsonlHistory {
    path: std::path::PathBuf,
    index: MemoryHistory,
    file: std::sync::Mutex<std::fs::File>,
}

impl JsonlHistory {
    /// Open (or create) the history file and load every readable record.
    ///
    /// The file stays exclusively locked while the history is alive: only one process may append
    /// to it, so a second `open` of the same file fails until the first history is dropped.
    pub fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create history directory {:?}", parent))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open history {:?} for writing", path))?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(anyhow::anyhow!(
                    "history {:?} is in use by another pathmon process",
                    path
                ));
            }
            Err(error) => {
                return Err(error).with_context(|| format!("cannot lock history {:?}", path));
            }
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read history {:?}", path))?;
        let index = MemoryHistory::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TransferRecord>(line) {
                Ok(record) => index.record(record)?,
                Err(error) => tracing::warn!(
                    "skipping malformed history line {} in {:?}: {}",
                    idx + 1,
                    path,
                    error
                ),
            }
        }
        tracing::info!("loaded {} history records from {:?}", index.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            index,
            file: std::sync::Mutex::new(file),
        })
    }
}

impl TransferHistory for JsonlHistory {
    fn find_by_src(&self, src: &std::path::Path) -> anyhow::Result<Option<TransferRecord>> {
        self.index.find_by_src(src)
    }

    fn list_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<TransferRecord>> {
        self.index.list_since(since)
    }

    fn record(&self, record: TransferRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&record).context("cannot serialize history record")?;
        line.push('\n');
        {
            let mut file = self
                .file
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            file.write_all(line.as_bytes())
                .and_then(|_| file.flush())
                .with_context(|| format!("cannot append to history {:?}", self.path))?;
        }
        self.index.record(record)
    }
}
