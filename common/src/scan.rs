//! Candidate enumeration below a watched directory

use anyhow::Context;
use async_recursion::async_recursion;
use tracing::instrument;

use crate::classify::{self, Classifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: std::path::PathBuf,
    pub modified: std::time::SystemTime,
}

/// Recursively list media files below `root`, directory by directory in enumeration order.
///
/// An unreadable `root` is an error; unreadable subdirectories are logged and skipped.
/// Symlinks to files are listed, symlinked directories are not followed.
#[instrument(skip(classifier))]
pub async fn list_media(
    root: &std::path::Path,
    classifier: &Classifier,
) -> anyhow::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    collect(root, classifier, &mut candidates).await?;
    tracing::debug!("found {} media files", candidates.len());
    Ok(candidates)
}

#[async_recursion]
async fn collect(
    dir: &std::path::Path,
    classifier: &Classifier,
    candidates: &mut Vec<Candidate>,
) -> anyhow::Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", dir))?;
    let mut subdirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", dir))?
    {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::warn!("cannot stat {:?}: {}", path, error);
                continue;
            }
        };
        if file_type.is_dir() {
            subdirs.push(path);
            continue;
        }
        if !classifier.is_media(&path) {
            continue;
        }
        // follows symlinks
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => candidates.push(Candidate {
                modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
                path,
            }),
            Ok(_) => {}
            Err(error) => tracing::warn!("cannot stat {:?}: {}", path, error),
        }
    }
    for subdir in subdirs {
        if let Err(error) = collect(&subdir, classifier, candidates).await {
            tracing::warn!("skipping {:?}: {:#}", subdir, &error);
        }
    }
    Ok(())
}

/// Media files below `root` modified at or after `since` whose unit of work is not in `known`.
///
/// Stream files of one disc image share a unit, only the first one found is returned.
pub async fn recent_candidates(
    root: &std::path::Path,
    classifier: &Classifier,
    since: std::time::SystemTime,
    known: &std::collections::HashSet<std::path::PathBuf>,
) -> anyhow::Result<Vec<std::path::PathBuf>> {
    let mut units = std::collections::HashSet::new();
    let recent = list_media(root, classifier)
        .await?
        .into_iter()
        .filter(|candidate| candidate.modified >= since)
        .filter(|candidate| {
            let unit = classify::unit_path(&candidate.path);
            !known.contains(&candidate.path) && !known.contains(&unit) && units.insert(unit)
        })
        .map(|candidate| candidate.path)
        .collect();
    Ok(recent)
}
