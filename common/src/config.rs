//! Configuration types for runtime, output and monitoring settings

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for resource control
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of transfers running at once (0 = no limit)
    pub max_concurrent_transfers: usize,
    /// Dispatches started per second (0 = no throttle)
    pub dispatch_throttle: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Tracing configuration
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Write logs to this file instead of stdout
    pub log_file: Option<std::path::PathBuf>,
}

/// How a source file reaches its destination.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum TransferMode {
    #[serde(rename = "move")]
    #[value(name = "move")]
    Move,
    #[serde(rename = "copy")]
    #[value(name = "copy")]
    Copy,
    #[default]
    #[serde(rename = "link")]
    #[value(name = "link")]
    HardLink,
    #[serde(rename = "filesoftlink")]
    #[value(name = "filesoftlink")]
    SoftLink,
    #[serde(rename = "rclone_copy")]
    #[value(name = "rclone_copy")]
    RcloneCopy,
    #[serde(rename = "rclone_move")]
    #[value(name = "rclone_move")]
    RcloneMove,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
            TransferMode::HardLink => "link",
            TransferMode::SoftLink => "filesoftlink",
            TransferMode::RcloneCopy => "rclone_copy",
            TransferMode::RcloneMove => "rclone_move",
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transfer mode '{0}', expected one of: move, copy, link, filesoftlink, rclone_copy, rclone_move")]
pub struct UnknownTransferMode(pub String);

impl std::str::FromStr for TransferMode {
    type Err = UnknownTransferMode;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move" => Ok(TransferMode::Move),
            "copy" => Ok(TransferMode::Copy),
            "link" => Ok(TransferMode::HardLink),
            "filesoftlink" => Ok(TransferMode::SoftLink),
            "rclone_copy" => Ok(TransferMode::RcloneCopy),
            "rclone_move" => Ok(TransferMode::RcloneMove),
            other => Err(UnknownTransferMode(other.to_string())),
        }
    }
}

/// Extensions recognized as media when `media_extensions` is not configured.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".ts", ".iso", ".rmvb", ".avi", ".mov", ".mpeg", ".mpg", ".wmv", ".3gp",
    ".asf", ".m4v", ".flv", ".m2ts", ".strm", ".tp", ".f4v",
];

/// One entry of the media library directory catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDir {
    /// Category name, used as the secondary directory when categorization is on
    pub name: String,
    /// Library root the category lives in
    pub path: std::path::PathBuf,
    /// Case-insensitive regex matched against the file name, absent matches everything
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Upper bound of every configured duration; deadlines computed from larger values overflow.
pub const MAX_DURATION: std::time::Duration = std::time::Duration::from_secs(10 * 365 * 86400);

fn deserialize_duration<'de, D>(deserializer: D) -> Result<std::time::Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

/// Monitoring settings, loaded from a JSON file.
///
/// Every field has a default so a minimal file only needs `monitor_dirs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSettings {
    /// Periodic full resync and incremental scan timers run
    pub enabled: bool,
    /// Forward sync and transfer events to the notification hook
    pub notify: bool,
    /// Run one full resync shortly after start
    pub run_once: bool,
    /// Persist transfer history to `history_file`, otherwise history lives in memory only
    pub history: bool,
    /// Default categorization flag for lines without a `$` override
    pub category: bool,
    /// Ask the notification hook for a library refresh after each transfer
    pub refresh: bool,
    /// Look up destinations in the library catalog when a line has none
    pub auto_category: bool,
    /// Also soft-link transferred targets into `softlink_dir`
    pub softlink_linkage: bool,
    /// Default transfer mode for lines without a `#` override
    pub transfer_mode: TransferMode,
    /// Directory specification, one watched directory per line
    pub monitor_dirs: String,
    /// Exclusion keywords (regex), one per line
    pub exclude_keywords: String,
    /// Globally configured transfer-exclude patterns, matched case-insensitively
    pub transfer_exclude_words: Vec<String>,
    /// Recognized media extensions, including the leading dot
    pub media_extensions: Vec<String>,
    /// Delay between an incremental scan finding a file and dispatching it
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: std::time::Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub full_sync_interval: std::time::Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub scan_interval: std::time::Duration,
    /// Only files modified within this window are incremental candidates
    #[serde(deserialize_with = "deserialize_duration")]
    pub recent_window: std::time::Duration,
    /// History entries within this window are subtracted from incremental candidates
    #[serde(deserialize_with = "deserialize_duration")]
    pub history_window: std::time::Duration,
    pub default_destination: Option<std::path::PathBuf>,
    pub softlink_dir: Option<std::path::PathBuf>,
    pub libraries: Vec<LibraryDir>,
    pub history_file: std::path::PathBuf,
    /// Replace an existing destination instead of failing the transfer
    pub overwrite: bool,
    pub max_concurrent_transfers: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            notify: false,
            run_once: false,
            history: true,
            category: false,
            refresh: true,
            auto_category: false,
            softlink_linkage: false,
            transfer_mode: TransferMode::HardLink,
            monitor_dirs: String::new(),
            exclude_keywords: String::new(),
            transfer_exclude_words: Vec::new(),
            media_extensions: DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            delay: std::time::Duration::from_secs(60),
            full_sync_interval: std::time::Duration::from_secs(24 * 60 * 60),
            scan_interval: std::time::Duration::from_secs(5 * 60),
            recent_window: std::time::Duration::from_secs(3 * 24 * 60 * 60),
            history_window: std::time::Duration::from_secs(4 * 24 * 60 * 60),
            default_destination: None,
            softlink_dir: None,
            libraries: Vec::new(),
            history_file: std::path::PathBuf::from("pathmon-history.jsonl"),
            overwrite: false,
            max_concurrent_transfers: 0,
        }
    }
}

impl MonitorSettings {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let settings: MonitorSettings =
            serde_json::from_str(text).context("invalid monitor settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("failed loading settings from {:?}", path))
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("delay", self.delay),
            ("full_sync_interval", self.full_sync_interval),
            ("scan_interval", self.scan_interval),
            ("recent_window", self.recent_window),
            ("history_window", self.history_window),
        ] {
            if value > MAX_DURATION {
                return Err(anyhow::anyhow!(
                    "{} ({}) must not exceed {}",
                    name,
                    humantime::format_duration(value),
                    humantime::format_duration(MAX_DURATION)
                ));
            }
        }
        if self.scan_interval.is_zero() || self.full_sync_interval.is_zero() {
            return Err(anyhow::anyhow!("scan_interval and full_sync_interval must be non-zero"));
        }
        if self.history_window < self.recent_window {
            return Err(anyhow::anyhow!(
                "history_window ({}) must not be shorter than recent_window ({})",
                humantime::format_duration(self.history_window),
                humantime::format_duration(self.recent_window)
            ));
        }
        if self.softlink_linkage && self.softlink_dir.is_none() {
            return Err(anyhow::anyhow!("softlink_linkage requires softlink_dir"));
        }
        Ok(())
    }

    /// Exclusion keywords as configured, blank lines dropped
    pub fn exclude_keyword_list(&self) -> Vec<String> {
        self.exclude_keywords
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }
}
