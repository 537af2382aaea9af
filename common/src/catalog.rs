//! Media library directory catalog used for destination routing
//!
//! The catalog is only consulted as a lookup: given the name of a unit of work, which library
//! directory (and category name) should it go to.

use crate::config::LibraryDir;

pub trait LibraryCatalog: Send + Sync + std::fmt::Debug {
    fn lookup(&self, name: &str) -> Option<&LibraryDir>;
}

/// Catalog built from the configured `libraries` list; the first matching entry wins.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<(LibraryDir, Option<regex::Regex>)>,
}

impl StaticCatalog {
    pub fn new(libraries: &[LibraryDir]) -> anyhow::Result<Self> {
        let mut entries = Vec::with_capacity(libraries.len());
        for library in libraries {
            let pattern = match &library.pattern {
                Some(pattern) => Some(
                    regex::RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|error| {
                            anyhow::anyhow!(
                                "library {:?} has an invalid pattern {:?}: {}",
                                library.name,
                                pattern,
                                error
                            )
                        })?,
                ),
                None => None,
            };
            entries.push((library.clone(), pattern));
        }
        Ok(Self { entries })
    }
}

impl LibraryCatalog for StaticCatalog {
    fn lookup(&self, name: &str) -> Option<&LibraryDir> {
        self.entries
            .iter()
            .find(|(_, pattern)| pattern.as_ref().is_none_or(|p| p.is_match(name)))
            .map(|(library, _)| library)
    }
}

/// Where a unit of work should be placed.
#[derive(Debug, Clone)]
pub struct Routing {
    pub auto_category: bool,
    pub default_destination: Option<std::path::PathBuf>,
    pub catalog: std::sync::Arc<dyn LibraryCatalog>,
}

impl Routing {
    /// Resolve the full target path for `unit`, owned by the watched directory `watched`.
    pub fn resolve(
        &self,
        watched: &crate::dirconf::WatchedDirectory,
        unit: &std::path::Path,
    ) -> anyhow::Result<std::path::PathBuf> {
        let name = unit
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{:?} has no file name", unit))?
            .to_string_lossy();
        let library = self.catalog.lookup(&name);
        let mut target = match (&watched.destination, library) {
            (Some(destination), _) => destination.clone(),
            (None, Some(library)) if self.auto_category => library.path.clone(),
            (None, _) => self.default_destination.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "no destination for {:?}: {:?} has none configured and no default is set",
                    unit,
                    watched.source
                )
            })?,
        };
        if let Some(library) = library.filter(|_| watched.category) {
            target.push(&library.name);
        }
        match unit.strip_prefix(&watched.source) {
            Ok(relative) if !relative.as_os_str().is_empty() => target.push(relative),
            _ => target.push(&*name),
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use crate::dirconf::WatchedDirectory;

    fn libraries() -> Vec<LibraryDir> {
        vec![
            LibraryDir {
                name: "TV".into(),
                path: "/library/tv".into(),
                pattern: Some(r"S\d+E\d+".into()),
            },
            LibraryDir {
                name: "Movies".into(),
                path: "/library/movies".into(),
                pattern: None,
            },
        ]
    }

    fn routing(auto_category: bool, default_destination: Option<&str>) -> Routing {
        Routing {
            auto_category,
            default_destination: default_destination.map(Into::into),
            catalog: std::sync::Arc::new(StaticCatalog::new(&libraries()).unwrap()),
        }
    }

    fn watched(destination: Option<&str>, category: bool) -> WatchedDirectory {
        WatchedDirectory {
            source: "/downloads".into(),
            destination: destination.map(Into::into),
            mode: TransferMode::HardLink,
            category,
        }
    }

    #[test]
    fn catalog_first_match_wins() {
        let catalog = StaticCatalog::new(&libraries()).unwrap();
        assert_eq!(catalog.lookup("Show.s01e02.mkv").unwrap().name, "TV");
        assert_eq!(catalog.lookup("Film.2020.mkv").unwrap().name, "Movies");
        assert!(StaticCatalog::default().lookup("x.mkv").is_none());
    }

    #[test]
    fn invalid_catalog_pattern() {
        let bad = vec![LibraryDir {
            name: "x".into(),
            path: "/x".into(),
            pattern: Some("(".into()),
        }];
        assert!(StaticCatalog::new(&bad).is_err());
    }

    #[test]
    fn explicit_destination_keeps_layout() {
        let target = routing(false, None)
            .resolve(
                &watched(Some("/dst"), false),
                "/downloads/Film/Film.2020.mkv".as_ref(),
            )
            .unwrap();
        assert_eq!(target, std::path::Path::new("/dst/Film/Film.2020.mkv"));
    }

    #[test]
    fn categorization_inserts_category() {
        let target = routing(false, None)
            .resolve(
                &watched(Some("/dst"), true),
                "/downloads/Show.S01E02.mkv".as_ref(),
            )
            .unwrap();
        assert_eq!(target, std::path::Path::new("/dst/TV/Show.S01E02.mkv"));
    }

    #[test]
    fn auto_category_and_default() {
        let target = routing(true, None)
            .resolve(&watched(None, false), "/downloads/Film.mkv".as_ref())
            .unwrap();
        assert_eq!(target, std::path::Path::new("/library/movies/Film.mkv"));
        let target = routing(false, Some("/fallback"))
            .resolve(&watched(None, false), "/downloads/Film.mkv".as_ref())
            .unwrap();
        assert_eq!(target, std::path::Path::new("/fallback/Film.mkv"));
        assert!(routing(false, None)
            .resolve(&watched(None, false), "/downloads/Film.mkv".as_ref())
            .is_err());
    }

    #[test]
    fn watched_root_itself() {
        let target = routing(false, None)
            .resolve(&watched(Some("/dst"), false), "/downloads".as_ref())
            .unwrap();
        assert_eq!(target, std::path::Path::new("/dst/downloads"));
    }
}
