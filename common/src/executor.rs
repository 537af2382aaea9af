//! Transfer requests and the executor that carries them out

use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::TransferMode;
use crate::history::{TransferHistory, TransferRecord};

/// Error type for transfers, keeps the unit path next to the cause.
///
/// # Logging Convention
/// The Display implementation shows the full error chain:
/// ```ignore
/// tracing::error!("transfer failed: {}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("transfer of {path:?} failed: {source:#}")]
pub struct Error {
    pub path: std::path::PathBuf,
    #[source]
    pub source: anyhow::Error,
}

impl Error {
    #[must_use]
    pub fn new(path: &std::path::Path, source: anyhow::Error) -> Self {
        Error {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// Collapsed disc-image root, transferred as a whole
    Directory,
}

/// Everything the executor needs to transfer one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Storage backend of the source, always "local" for watched directories
    pub storage: &'static str,
    pub kind: EntryKind,
    pub path: std::path::PathBuf,
    /// File name including extension
    pub name: String,
    /// File name without extension
    pub base_name: String,
    /// Extension without the dot, empty when there is none
    pub extension: String,
    /// Bytes; for directories the sum of all contained files
    pub size: u64,
    pub mode: TransferMode,
    pub target: std::path::PathBuf,
    /// Layout below the destination root, mirrored by soft-link linkage
    pub relative: std::path::PathBuf,
}

impl TransferRequest {
    /// Build a request from the unit's current metadata.
    pub async fn inspect(
        path: &std::path::Path,
        mode: TransferMode,
        target: std::path::PathBuf,
    ) -> anyhow::Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", path))?;
        let (kind, size) = if metadata.is_dir() {
            (EntryKind::Directory, tree_size(path).await?)
        } else {
            (EntryKind::File, metadata.len())
        };
        let os_str_to_string =
            |value: Option<&std::ffi::OsStr>| value.map(|v| v.to_string_lossy().into_owned());
        let name = os_str_to_string(path.file_name()).unwrap_or_default();
        Ok(Self {
            storage: "local",
            kind,
            path: path.to_path_buf(),
            relative: std::path::PathBuf::from(&name),
            name,
            base_name: os_str_to_string(path.file_stem()).unwrap_or_default(),
            extension: os_str_to_string(path.extension()).unwrap_or_default(),
            size,
            mode,
            target,
        })
    }
}

#[async_recursion]
async fn tree_size(path: &std::path::Path) -> anyhow::Result<u64> {
    let mut total = 0;
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", path))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", path))?
    {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            total += tree_size(&entry.path()).await?;
        } else if file_type.is_file() {
            total += entry.metadata().await?.len();
        }
    }
    Ok(total)
}

/// Performs the move/copy/link of one unit of work.
///
/// Implementations record the transfer in the history store on success; a failed transfer
/// leaves no record so a later scan retries it.
#[async_trait::async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn execute(&self, request: &TransferRequest) -> Result<(), Error>;
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Remove an existing target instead of failing
    pub overwrite: bool,
    /// Soft-link every transferred target below this directory as well
    pub softlink_dir: Option<std::path::PathBuf>,
    /// Defaults to `rclone` on PATH
    pub rclone_binary: Option<std::path::PathBuf>,
}

/// Executes transfers on the local filesystem.
pub struct LocalExecutor {
    settings: Settings,
    history: std::sync::Arc<dyn TransferHistory>,
}

impl LocalExecutor {
    pub fn new(settings: Settings, history: std::sync::Arc<dyn TransferHistory>) -> Self {
        Self { settings, history }
    }

    #[instrument(skip(self))]
    async fn prepare_target(&self, target: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory {:?}", parent))?;
        }
        match tokio::fs::symlink_metadata(target).await {
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(anyhow::Error::new(error).context(format!("cannot inspect {:?}", target)))
            }
            Ok(_) if !self.settings.overwrite => Err(anyhow!(
                "destination {:?} already exists, enable overwrite to replace it",
                target
            )),
            Ok(metadata) => {
                tracing::info!("removing existing destination {:?}", target);
                if metadata.is_dir() {
                    tokio::fs::remove_dir_all(target).await
                } else {
                    tokio::fs::remove_file(target).await
                }
                .with_context(|| format!("failed removing {:?}", target))
            }
        }
    }

    async fn transfer(&self, request: &TransferRequest) -> anyhow::Result<()> {
        let src = request.path.as_path();
        let dst = request.target.as_path();
        match request.mode {
            TransferMode::Move => move_entry(src, dst).await,
            TransferMode::Copy => copy_entry(src, dst).await,
            TransferMode::HardLink => link_entry(src, dst).await,
            TransferMode::SoftLink => tokio::fs::symlink(src, dst)
                .await
                .with_context(|| format!("failed to soft link {:?} to {:?}", dst, src)),
            TransferMode::RcloneCopy => self.rclone("copyto", src, dst).await,
            TransferMode::RcloneMove => self.rclone("moveto", src, dst).await,
        }
    }

    async fn rclone(
        &self,
        verb: &str,
        src: &std::path::Path,
        dst: &std::path::Path,
    ) -> anyhow::Result<()> {
        let binary = self
            .settings
            .rclone_binary
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("rclone"));
        tracing::debug!("running {:?} {} {:?} {:?}", binary, verb, src, dst);
        let output = tokio::process::Command::new(&binary)
            .arg(verb)
            .arg(src)
            .arg(dst)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {:?}", binary))?;
        if !output.status.success() {
            return Err(anyhow!(
                "rclone {} exited with {}: {}",
                verb,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn link_into_softlink_dir(&self, request: &TransferRequest) -> anyhow::Result<()> {
        let Some(softlink_dir) = &self.settings.softlink_dir else {
            return Ok(());
        };
        if request.mode == TransferMode::SoftLink {
            return Ok(());
        }
        let link = softlink_dir.join(&request.relative);
        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory {:?}", parent))?;
        }
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            tokio::fs::remove_file(&link)
                .await
                .with_context(|| format!("failed removing stale link {:?}", link))?;
        }
        tokio::fs::symlink(&request.target, &link)
            .await
            .with_context(|| format!("failed to soft link {:?} to {:?}", link, request.target))
    }
}

#[async_trait::async_trait]
impl TransferExecutor for LocalExecutor {
    #[instrument(skip(self, request), fields(path = ?request.path, mode = %request.mode))]
    async fn execute(&self, request: &TransferRequest) -> Result<(), Error> {
        let _slot = throttle::transfer_permit().await;
        let fail = |error: anyhow::Error| Error::new(&request.path, error);
        self.prepare_target(&request.target).await.map_err(fail)?;
        self.transfer(request).await.map_err(fail)?;
        tracing::info!(
            "{} {:?} -> {:?} ({})",
            request.mode,
            request.path,
            request.target,
            bytesize::ByteSize(request.size)
        );
        self.history
            .record(TransferRecord {
                src: request.path.clone(),
                dest: request.target.clone(),
                mode: request.mode,
                date: chrono::Utc::now(),
            })
            .map_err(fail)?;
        if let Err(error) = self.link_into_softlink_dir(request).await {
            // the transfer itself succeeded and is recorded
            tracing::warn!("soft link linkage failed: {:#}", &error);
        }
        Ok(())
    }
}

fn is_cross_device(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::CrossesDevices
        || error.raw_os_error() == Some(18) // EXDEV
}

#[instrument]
async fn move_entry(src: &std::path::Path, dst: &std::path::Path) -> anyhow::Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(error) if is_cross_device(&error) => {
            tracing::debug!("rename crosses devices, falling back to copy and remove");
            copy_entry(src, dst).await?;
            let metadata = tokio::fs::symlink_metadata(src)
                .await
                .with_context(|| format!("failed reading metadata from {:?}", src))?;
            if metadata.is_dir() {
                tokio::fs::remove_dir_all(src).await
            } else {
                tokio::fs::remove_file(src).await
            }
            .with_context(|| format!("failed removing {:?} after copy", src))
        }
        Err(error) => {
            Err(anyhow::Error::new(error).context(format!("failed moving {:?} to {:?}", src, dst)))
        }
    }
}

#[async_recursion]
async fn copy_entry(src: &std::path::Path, dst: &std::path::Path) -> anyhow::Result<()> {
    let metadata = tokio::fs::symlink_metadata(src)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", src))?;
    if !metadata.is_dir() {
        tokio::fs::copy(src, dst)
            .await
            .with_context(|| format!("failed copying {:?} to {:?}", src, dst))?;
        return Ok(());
    }
    tokio::fs::create_dir(dst)
        .await
        .with_context(|| format!("cannot create directory {:?}", dst))?;
    let mut entries = tokio::fs::read_dir(src)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", src))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", src))?
    {
        copy_entry(&entry.path(), &dst.join(entry.file_name())).await?;
    }
    Ok(())
}

#[async_recursion]
async fn link_entry(src: &std::path::Path, dst: &std::path::Path) -> anyhow::Result<()> {
    let metadata = tokio::fs::symlink_metadata(src)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", src))?;
    if !metadata.is_dir() {
        tokio::fs::hard_link(src, dst)
            .await
            .with_context(|| format!("failed to hard link {:?} to {:?}", src, dst))?;
        return Ok(());
    }
    tokio::fs::create_dir(dst)
        .await
        .with_context(|| format!("cannot create directory {:?}", dst))?;
    let mut entries = tokio::fs::read_dir(src)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", src))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", src))?
    {
        link_entry(&entry.path(), &dst.join(entry.file_name())).await?;
    }
    Ok(())
}
