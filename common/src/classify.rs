//! Candidate path classification
//!
//! Decides whether a single path is eligible for transfer. The checks run in a fixed order,
//! cheapest first, and the first rejection wins:
//!
//! 1. noise: recycle bins, hidden components, NAS extended-attribute directories
//! 2. configured exclusion keywords (regex against the full path)
//! 3. transfer-exclude patterns from the system configuration (case-insensitive regex)
//! 4. extension not in the recognized media set
//!
//! Accepted paths inside a disc-image layout (`BDMV/STREAM`, `VIDEO_TS`) are collapsed to the
//! disc root so that all stream files of one title share a single unit of work.

/// Directory names that hold deleted files on common NAS and desktop systems.
const RECYCLE_DIRS: &[&str] = &["@recycle", "#recycle", "$recycle.bin", "@eadir"];

/// Why a path was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Recycle bin, hidden component or extended-attribute directory
    Noise(String),
    ExcludedKeyword(String),
    ExcludedWord(String),
    NotMedia,
    /// Disc-image marker without a usable parent directory
    UnresolvableDiscRoot,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Noise(component) => write!(f, "ignored directory '{}'", component),
            RejectReason::ExcludedKeyword(keyword) => {
                write!(f, "matches exclusion keyword '{}'", keyword)
            }
            RejectReason::ExcludedWord(word) => {
                write!(f, "matches transfer-exclude pattern '{}'", word)
            }
            RejectReason::NotMedia => write!(f, "not a media file"),
            RejectReason::UnresolvableDiscRoot => write!(f, "disc-image root cannot be resolved"),
        }
    }
}

/// Accepted unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Path that is deduplicated and transferred
    pub path: std::path::PathBuf,
    /// Set when `path` is a collapsed disc-image root
    pub disc_root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accept(Accepted),
    Reject(RejectReason),
}

#[derive(Debug, Clone)]
struct Pattern {
    original: String,
    regex: regex::Regex,
}

impl Pattern {
    fn compile(pattern: &str, case_insensitive: bool) -> Option<Self> {
        let build = |source: &str| {
            regex::RegexBuilder::new(source)
                .case_insensitive(case_insensitive)
                .build()
        };
        let regex = match build(pattern) {
            Ok(regex) => regex,
            Err(error) => {
                tracing::warn!(
                    "pattern {:?} is not a valid regex ({}), matching it literally",
                    pattern,
                    error
                );
                match build(&regex::escape(pattern)) {
                    Ok(regex) => regex,
                    Err(error) => {
                        tracing::error!("dropping pattern {:?}: {}", pattern, error);
                        return None;
                    }
                }
            }
        };
        Some(Self {
            original: pattern.to_string(),
            regex,
        })
    }
}

/// Compiled classification rules, rebuilt on every configuration load.
#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: Vec<Pattern>,
    exclude_words: Vec<Pattern>,
    /// lowercase, with leading dot
    extensions: std::collections::HashSet<String>,
}

impl Classifier {
    pub fn new<K, W, E>(keywords: K, exclude_words: W, extensions: E) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        W: IntoIterator,
        W::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let compile_all = |patterns: Vec<String>, case_insensitive: bool| {
            patterns
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .filter_map(|p| Pattern::compile(p, case_insensitive))
                .collect::<Vec<_>>()
        };
        let keywords = compile_all(
            keywords.into_iter().map(|k| k.as_ref().to_string()).collect(),
            false,
        );
        let exclude_words = compile_all(
            exclude_words
                .into_iter()
                .map(|w| w.as_ref().to_string())
                .collect(),
            true,
        );
        let extensions = extensions
            .into_iter()
            .map(|ext| {
                let ext = ext.as_ref().trim().to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();
        Self {
            keywords,
            exclude_words,
            extensions,
        }
    }

    pub fn is_media(&self, path: &std::path::Path) -> bool {
        path.extension()
            .map(|ext| {
                self.extensions
                    .contains(&format!(".{}", ext.to_string_lossy().to_lowercase()))
            })
            .unwrap_or(false)
    }

    /// Classify `path`, found below the watched directory `root`.
    pub fn classify(&self, root: &std::path::Path, path: &std::path::Path) -> Classification {
        if let Some(component) = noise_component(root, path) {
            return Classification::Reject(RejectReason::Noise(component));
        }
        let full = path.to_string_lossy();
        if let Some(keyword) = self.keywords.iter().find(|k| k.regex.is_match(&full)) {
            return Classification::Reject(RejectReason::ExcludedKeyword(keyword.original.clone()));
        }
        if let Some(word) = self.exclude_words.iter().find(|w| w.regex.is_match(&full)) {
            return Classification::Reject(RejectReason::ExcludedWord(word.original.clone()));
        }
        if !self.is_media(path) {
            return Classification::Reject(RejectReason::NotMedia);
        }
        match disc_root(path) {
            Some(DiscRoot::Root(root)) => Classification::Accept(Accepted {
                path: root,
                disc_root: true,
            }),
            Some(DiscRoot::Unresolvable) => {
                Classification::Reject(RejectReason::UnresolvableDiscRoot)
            }
            None => Classification::Accept(Accepted {
                path: path.to_path_buf(),
                disc_root: false,
            }),
        }
    }
}

/// First component below `root` that marks recycled, hidden or metadata content.
fn noise_component(root: &std::path::Path, path: &std::path::Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().find_map(|component| {
        let std::path::Component::Normal(name) = component else {
            return None;
        };
        let name = name.to_string_lossy();
        if name.starts_with('.') || RECYCLE_DIRS.iter().any(|d| name.eq_ignore_ascii_case(d)) {
            Some(name.into_owned())
        } else {
            None
        }
    })
}

/// Unit of work `path` belongs to: its disc-image root, or the path itself.
pub fn unit_path(path: &std::path::Path) -> std::path::PathBuf {
    match disc_root(path) {
        Some(DiscRoot::Root(root)) => root,
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DiscRoot {
    Root(std::path::PathBuf),
    Unresolvable,
}

/// Locate a disc-image layout marker in `path` and return the directory holding it.
///
/// Markers are matched per component, case-insensitively: `BDMV` directly followed by `STREAM`
/// (Blu-ray), or `VIDEO_TS` (DVD).
fn disc_root(path: &std::path::Path) -> Option<DiscRoot> {
    let components: Vec<_> = path.components().collect();
    let is = |idx: usize, name: &str| {
        matches!(components.get(idx), Some(std::path::Component::Normal(c)) if c.eq_ignore_ascii_case(name))
    };
    // the last component is the file itself and never a marker
    let marker = (0..components.len().saturating_sub(1))
        .find(|&idx| (is(idx, "BDMV") && is(idx + 1, "STREAM")) || is(idx, "VIDEO_TS"))?;
    let root: std::path::PathBuf = components[..marker].iter().collect();
    if root.file_name().is_none() {
        return Some(DiscRoot::Unresolvable);
    }
    Some(DiscRoot::Root(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(
            ["sample", "[invalid"],
            ["TRAILER"],
            crate::config::DEFAULT_MEDIA_EXTENSIONS,
        )
    }

    fn accept(path: &str, disc_root: bool) -> Classification {
        Classification::Accept(Accepted {
            path: path.into(),
            disc_root,
        })
    }

    fn classify(path: &str) -> Classification {
        classifier().classify(std::path::Path::new("/lib"), std::path::Path::new(path))
    }

    #[test]
    fn plain_media_file() {
        assert_eq!(classify("/lib/Movie/movie.mkv"), accept("/lib/Movie/movie.mkv", false));
        assert_eq!(classify("/lib/Movie/MOVIE.MKV"), accept("/lib/Movie/MOVIE.MKV", false));
    }

    #[test]
    fn noise_is_rejected() {
        for path in [
            "/lib/@Recycle/movie.mkv",
            "/lib/#recycle/movie.mkv",
            "/lib/Movie/.hidden.mkv",
            "/lib/.partial/movie.mkv",
            "/lib/@eaDir/movie.mkv",
        ] {
            assert!(
                matches!(classify(path), Classification::Reject(RejectReason::Noise(_))),
                "{path} should be noise"
            );
        }
    }

    #[test]
    fn noise_above_root_is_ignored() {
        let classifier = classifier();
        let result = classifier.classify(
            std::path::Path::new("/home/user/.media"),
            std::path::Path::new("/home/user/.media/movie.mkv"),
        );
        assert_eq!(result, accept("/home/user/.media/movie.mkv", false));
    }

    #[test]
    fn keywords_before_extension() {
        assert_eq!(
            classify("/lib/Movie/sample.mkv"),
            Classification::Reject(RejectReason::ExcludedKeyword("sample".into()))
        );
        // keyword matching is case sensitive
        assert_eq!(classify("/lib/Movie/SAMPLE.mkv"), accept("/lib/Movie/SAMPLE.mkv", false));
        // exclude words are not
        assert_eq!(
            classify("/lib/Movie/trailer.mkv"),
            Classification::Reject(RejectReason::ExcludedWord("TRAILER".into()))
        );
        // an invalid regex is matched literally
        assert_eq!(
            classify("/lib/[invalid/movie.mkv"),
            Classification::Reject(RejectReason::ExcludedKeyword("[invalid".into()))
        );
    }

    #[test]
    fn non_media_rejected() {
        assert_eq!(
            classify("/lib/Movie/movie.nfo"),
            Classification::Reject(RejectReason::NotMedia)
        );
        assert_eq!(
            classify("/lib/Movie/README"),
            Classification::Reject(RejectReason::NotMedia)
        );
    }

    #[test]
    fn bluray_collapses_to_root() {
        assert_eq!(classify("/lib/Movie/BDMV/STREAM/00001.m2ts"), accept("/lib/Movie", true));
        assert_eq!(classify("/lib/Movie/bdmv/stream/00002.m2ts"), accept("/lib/Movie", true));
        // BDMV without STREAM is not a disc layout
        assert_eq!(
            classify("/lib/Movie/BDMV/BACKUP/00001.m2ts"),
            accept("/lib/Movie/BDMV/BACKUP/00001.m2ts", false)
        );
    }

    #[test]
    fn dvd_collapses_to_root() {
        let classifier = Classifier::new(Vec::<String>::new(), Vec::<String>::new(), ["vob"]);
        assert_eq!(
            classifier.classify(
                std::path::Path::new("/lib"),
                std::path::Path::new("/lib/Film/VIDEO_TS/VTS_01_1.VOB")
            ),
            accept("/lib/Film", true)
        );
    }

    #[test]
    fn disc_marker_at_filesystem_root() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify(
                std::path::Path::new("/"),
                std::path::Path::new("/BDMV/STREAM/00001.m2ts")
            ),
            Classification::Reject(RejectReason::UnresolvableDiscRoot)
        );
    }
}
