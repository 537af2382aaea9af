//! Filesystem fixtures and test doubles shared by the unit tests

use anyhow::Context;

use crate::config::TransferMode;
use crate::executor::{TransferExecutor, TransferRequest};
use crate::history::{MemoryHistory, TransferHistory, TransferRecord};

/// Size of every stream file written by [`create_disc_image`].
pub const STREAM_SIZE: usize = 16;

/// Create `<parent>/<name>/BDMV/STREAM/0000N.m2ts` for N in 1..=streams, return the title root.
pub async fn create_disc_image(
    parent: &std::path::Path,
    name: &str,
    streams: usize,
) -> anyhow::Result<std::path::PathBuf> {
    let root = parent.join(name);
    let stream_dir = root.join("BDMV").join("STREAM");
    tokio::fs::create_dir_all(&stream_dir).await?;
    tokio::fs::write(root.join("BDMV").join("index.bdmv"), "").await?;
    for idx in 1..=streams {
        tokio::fs::write(
            stream_dir.join(format!("{:05}.m2ts", idx)),
            vec![b'x'; STREAM_SIZE],
        )
        .await?;
    }
    Ok(root)
}

/// Write `contents` to `path`, creating parent directories.
pub async fn create_file(path: &std::path::Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("cannot write {:?}", path))
}

/// Backdate the modification time of `path`.
pub fn set_mtime_days_ago(path: &std::path::Path, days: u64) -> anyhow::Result<()> {
    let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(days * 24 * 60 * 60);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime))
        .with_context(|| format!("cannot set mtime of {:?}", path))
}

// downloads
// |- Film.2020
//    |- Film.2020.mkv
//    |- Film.2020.nfo
// |- Show.S01E01.mp4
// |- sample.mkv
// |- @eaDir
//    |- Show.S01E01.mp4
// |- Movie
//    |- BDMV
//       |- index.bdmv
//       |- STREAM
//          |- 00001.m2ts
//          |- 00002.m2ts
pub async fn setup_media_tree(root: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
    let downloads = root.join("downloads");
    create_file(&downloads.join("Film.2020").join("Film.2020.mkv"), "film").await?;
    create_file(&downloads.join("Film.2020").join("Film.2020.nfo"), "<nfo/>").await?;
    create_file(&downloads.join("Show.S01E01.mp4"), "show").await?;
    create_file(&downloads.join("sample.mkv"), "sample").await?;
    create_file(&downloads.join("@eaDir").join("Show.S01E01.mp4"), "thumb").await?;
    create_disc_image(&downloads, "Movie", 2).await?;
    Ok(downloads)
}

#[async_recursion::async_recursion]
pub async fn check_dirs_identical(
    src: &std::path::Path,
    dst: &std::path::Path,
) -> anyhow::Result<()> {
    let mut src_entries = tokio::fs::read_dir(src).await?;
    while let Some(src_entry) = src_entries.next_entry().await? {
        let src_entry_path = src_entry.path();
        let dst_entry_path = dst.join(src_entry.file_name());
        let src_md = tokio::fs::metadata(&src_entry_path)
            .await
            .with_context(|| format!("source file {:?} is missing", &src_entry_path))?;
        let dst_md = tokio::fs::metadata(&dst_entry_path)
            .await
            .with_context(|| format!("destination file {:?} is missing", &dst_entry_path))?;
        assert_eq!(src_md.is_file(), dst_md.is_file());
        if src_md.is_file() {
            let src_contents = tokio::fs::read(&src_entry_path).await?;
            let dst_contents = tokio::fs::read(&dst_entry_path).await?;
            assert_eq!(src_contents, dst_contents);
        } else {
            check_dirs_identical(&src_entry_path, &dst_entry_path).await?;
        }
    }
    Ok(())
}

/// History wrapper counting lookups.
#[derive(Debug, Default)]
pub struct CountingHistory {
    inner: MemoryHistory,
    lookups: std::sync::atomic::AtomicUsize,
}

impl CountingHistory {
    pub fn lookups(&self) -> usize {
        self.lookups.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl TransferHistory for CountingHistory {
    fn find_by_src(&self, src: &std::path::Path) -> anyhow::Result<Option<TransferRecord>> {
        self.lookups
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.find_by_src(src)
    }

    fn list_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<TransferRecord>> {
        self.inner.list_since(since)
    }

    fn record(&self, record: TransferRecord) -> anyhow::Result<()> {
        self.inner.record(record)
    }
}

/// Executor that only records the requests it receives (and the history marker), optionally
/// failing every call.
pub struct RecordingExecutor {
    history: std::sync::Arc<dyn TransferHistory>,
    requests: std::sync::Mutex<Vec<TransferRequest>>,
    fail: bool,
}

impl RecordingExecutor {
    pub fn new(history: std::sync::Arc<dyn TransferHistory>) -> Self {
        Self {
            history,
            requests: Default::default(),
            fail: false,
        }
    }

    pub fn failing(history: std::sync::Arc<dyn TransferHistory>) -> Self {
        Self {
            fail: true,
            ..Self::new(history)
        }
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TransferExecutor for RecordingExecutor {
    async fn execute(&self, request: &TransferRequest) -> Result<(), crate::executor::Error> {
        self.requests.lock().unwrap().push(request.clone());
        // let concurrent callers pile up on the same path
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if self.fail {
            return Err(crate::executor::Error::new(
                &request.path,
                anyhow::anyhow!("simulated failure"),
            ));
        }
        self.history
            .record(TransferRecord {
                src: request.path.clone(),
                dest: request.target.clone(),
                mode: request.mode,
                date: chrono::Utc::now(),
            })
            .map_err(|error| crate::executor::Error::new(&request.path, error))?;
        Ok(())
    }
}

/// Convenience for tests that only care about the mode.
pub fn record(src: &std::path::Path, mode: TransferMode) -> TransferRecord {
    TransferRecord {
        src: src.to_path_buf(),
        dest: std::path::PathBuf::from("/dst").join(src.file_name().unwrap_or_default()),
        mode,
        date: chrono::Utc::now(),
    }
}
