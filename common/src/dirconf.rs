//! Watched directory specification parsing
//!
//! Each non-empty line describes one watched directory:
//!
//! ```text
//! <source>[:<destination>][#<mode>][$<category>]
//! ```
//!
//! - `#<mode>` overrides the global transfer mode for the line
//! - `$<category>` overrides the global categorization flag (`true`/`false`, any case)
//! - the `#` and `$` suffixes may come in either order but each at most once
//! - a `#` or `$` followed by a `/` or `\` belongs to the path (`/downloads/C#/x`); such
//!   characters in the last path component cannot be told apart from a suffix
//! - a colon is a drive-letter colon (part of the path) when it follows a single ASCII letter
//!   that starts the string or directly follows the separator colon, and is itself followed by
//!   `\` or `/`; every other colon separates source from destination
//!
//! # Examples
//!
//! ```
//! use common::config::TransferMode;
//! use common::dirconf::{parse, Defaults};
//!
//! let parsed = parse(["/src:/dst#copy", "/other$True"], Defaults::default());
//! let dirs = parsed.directories;
//! assert_eq!(dirs.destination("/src".as_ref()), Some(Some("/dst".as_ref())));
//! assert_eq!(dirs.mode("/src".as_ref()), Some(TransferMode::Copy));
//! assert_eq!(dirs.category("/other".as_ref()), Some(true));
//! ```

use crate::config::{TransferMode, UnknownTransferMode};

/// Settings applied to lines that carry no override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Defaults {
    pub mode: TransferMode,
    pub category: bool,
}

/// One watched source directory and how its files are transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedDirectory {
    pub source: std::path::PathBuf,
    /// None means default routing (catalog lookup or the default destination)
    pub destination: Option<std::path::PathBuf>,
    pub mode: TransferMode,
    pub category: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("line {line}: {kind}")]
    Line { line: usize, kind: LineError },
    #[error("directory specification contains no watched directories")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("source path is empty")]
    EmptySource,
    #[error("'{0}' appears more than once")]
    RepeatedDelimiter(char),
    #[error("{0}")]
    InvalidMode(#[from] UnknownTransferMode),
    #[error("invalid categorization flag '{0}', expected true or false")]
    InvalidCategory(String),
    #[error("too many ':' separated parts in '{0}'")]
    TooManyParts(String),
    #[error("destination path is empty")]
    EmptyDestination,
    #[error("source {0:?} is already configured with different settings")]
    ConflictingDuplicate(std::path::PathBuf),
}

/// Watched directories keyed by source path, in configuration order.
///
/// Immutable once built; a reload builds a new map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryMap {
    entries: Vec<WatchedDirectory>,
}

impl DirectoryMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WatchedDirectory> {
        self.entries.iter()
    }

    pub fn get(&self, source: &std::path::Path) -> Option<&WatchedDirectory> {
        self.entries.iter().find(|entry| entry.source == source)
    }

    pub fn destination(&self, source: &std::path::Path) -> Option<Option<&std::path::Path>> {
        self.get(source).map(|entry| entry.destination.as_deref())
    }

    pub fn mode(&self, source: &std::path::Path) -> Option<TransferMode> {
        self.get(source).map(|entry| entry.mode)
    }

    pub fn category(&self, source: &std::path::Path) -> Option<bool> {
        self.get(source).map(|entry| entry.category)
    }

    /// Watched directory containing `path`; the most specific one wins for nested sources.
    pub fn owner_of(&self, path: &std::path::Path) -> Option<&WatchedDirectory> {
        self.entries
            .iter()
            .filter(|entry| path.starts_with(&entry.source))
            .max_by_key(|entry| entry.source.components().count())
    }
}

impl<'a> IntoIterator for &'a DirectoryMap {
    type Item = &'a WatchedDirectory;
    type IntoIter = std::slice::Iter<'a, WatchedDirectory>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Result of parsing a specification: the usable directories plus every skipped line.
#[derive(Debug, Clone, Default)]
pub struct ParsedDirectories {
    pub directories: DirectoryMap,
    pub errors: Vec<ConfigError>,
}

impl ParsedDirectories {
    /// Fail when nothing usable was configured.
    pub fn require_any(self) -> Result<Self, ConfigError> {
        if self.directories.is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(self)
    }
}

/// Parse a directory specification, skipping (and reporting) lines that cannot be parsed.
pub fn parse<I, S>(lines: I, defaults: Defaults) -> ParsedDirectories
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ParsedDirectories::default();
    for (idx, raw) in lines.into_iter().enumerate() {
        let line = raw.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let entry = match parse_line(line, defaults) {
            Ok(entry) => entry,
            Err(kind) => {
                tracing::warn!("skipping directory line {}: {:?}: {}", idx + 1, line, &kind);
                parsed.errors.push(ConfigError::Line {
                    line: idx + 1,
                    kind,
                });
                continue;
            }
        };
        match parsed.directories.get(&entry.source) {
            Some(existing) if *existing == entry => {
                tracing::debug!("ignoring duplicate directory line {}: {:?}", idx + 1, line);
            }
            Some(_) => {
                let kind = LineError::ConflictingDuplicate(entry.source.clone());
                tracing::warn!("skipping directory line {}: {:?}: {}", idx + 1, line, &kind);
                parsed.errors.push(ConfigError::Line {
                    line: idx + 1,
                    kind,
                });
            }
            None => parsed.directories.entries.push(entry),
        }
    }
    parsed
}

/// Convenience wrapper for a newline-separated specification.
pub fn parse_text(text: &str, defaults: Defaults) -> ParsedDirectories {
    parse(text.lines(), defaults)
}

/// Parse a single (trimmed, non-empty) specification line.
pub fn parse_line(line: &str, defaults: Defaults) -> Result<WatchedDirectory, LineError> {
    let suffixes = split_suffixes(line)?;
    let mode = match suffixes.mode {
        Some(mode) => mode.trim().parse::<TransferMode>()?,
        None => defaults.mode,
    };
    let category = match suffixes.category {
        Some(value) => parse_category(value.trim())?,
        None => defaults.category,
    };
    let (source, destination) = split_paths(suffixes.paths)?;
    Ok(WatchedDirectory {
        source: source.into(),
        destination: destination.map(std::path::PathBuf::from),
        mode,
        category,
    })
}

struct Suffixes<'a> {
    paths: &'a str,
    mode: Option<&'a str>,
    category: Option<&'a str>,
}

/// Peel `#`/`$` suffixes off the end of `line`, right to left.
///
/// A marker whose value contains a path separator is part of the path, along with everything
/// left of it.
fn split_suffixes(line: &str) -> Result<Suffixes<'_>, LineError> {
    let mut suffixes = Suffixes {
        paths: line,
        mode: None,
        category: None,
    };
    while let Some(start) = suffixes.paths.rfind(|c: char| c == '#' || c == '$') {
        let value = &suffixes.paths[start + 1..];
        if value.contains(|c: char| c == '/' || c == '\\') {
            break;
        }
        let (marker, slot) = if suffixes.paths[start..].starts_with('#') {
            ('#', &mut suffixes.mode)
        } else {
            ('$', &mut suffixes.category)
        };
        if slot.replace(value).is_some() {
            return Err(LineError::RepeatedDelimiter(marker));
        }
        suffixes.paths = &suffixes.paths[..start];
    }
    Ok(suffixes)
}

fn parse_category(value: &str) -> Result<bool, LineError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(LineError::InvalidCategory(value.to_string()))
    }
}

/// True when the colon at byte `idx` belongs to a drive letter such as `C:\`.
fn is_drive_colon(text: &str, idx: usize, segment_start: usize) -> bool {
    let bytes = text.as_bytes();
    idx == segment_start + 1
        && bytes[segment_start].is_ascii_alphabetic()
        && matches!(bytes.get(idx + 1), Some(b'\\') | Some(b'/'))
}

fn split_paths(paths: &str) -> Result<(&str, Option<&str>), LineError> {
    let paths = paths.trim();
    let mut separators = Vec::new();
    let mut segment_start = 0;
    for (idx, c) in paths.char_indices() {
        if c != ':' || is_drive_colon(paths, idx, segment_start) {
            continue;
        }
        separators.push(idx);
        segment_start = idx + 1;
    }
    match separators.as_slice() {
        [] => {
            if paths.is_empty() {
                return Err(LineError::EmptySource);
            }
            Ok((paths, None))
        }
        [sep] => {
            let source = paths[..*sep].trim();
            let destination = paths[*sep + 1..].trim();
            if source.is_empty() {
                return Err(LineError::EmptySource);
            }
            if destination.is_empty() {
                return Err(LineError::EmptyDestination);
            }
            Ok((source, Some(destination)))
        }
        _ => Err(LineError::TooManyParts(paths.to_string())),
    }
}
