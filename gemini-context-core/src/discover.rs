//! Recursive enumeration of the files to ingest.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A regular file found under the ingestion root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub absolute_path: PathBuf,
    /// Path relative to the root, `/`-separated on every platform.
    pub relative_path: String,
    pub size_bytes: u64,
}

/// Options controlling which entries are enumerated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverOptions {
    /// Regular expressions matched against each entry's relative path.
    /// Matching directories are pruned, matching files skipped.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("ingestion root {path:?} is not a readable directory")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ingestion root {0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("invalid ignore pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Enumerate every regular file reachable from `root`.
///
/// Symbolic links are never followed and never returned. Entries are sorted by
/// file name within each directory, so an unchanged tree always yields the same
/// sequence. Only a missing or unreadable root is an error; problems below the
/// root are logged and the offending entry skipped.
pub fn discover(root: &Path, options: &DiscoverOptions) -> Result<Vec<FileRecord>, DiscoveryError> {
    let ignore = options
        .ignore
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| DiscoveryError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let root_meta = std::fs::metadata(root).map_err(|source| DiscoveryError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }
    // Probe readability up front; walkdir would only report it as an entry error.
    std::fs::read_dir(root).map_err(|source| DiscoveryError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    info!(root = %root.display(), "Discovering files");

    let mut records = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let rel = relative_path(root, entry.path());
            let skip = ignore.iter().any(|re| re.is_match(&rel));
            if skip {
                debug!(path = %rel, "Ignoring entry");
            }
            !skip
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, path = ?e.path(), "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                // Size is only informational here; reading the file later reports the real error.
                warn!(error = %e, path = %entry.path().display(), "Could not stat file");
                0
            }
        };
        records.push(FileRecord {
            absolute_path: entry.path().to_path_buf(),
            relative_path: relative_path(root, entry.path()),
            size_bytes,
        });
    }

    info!(count = records.len(), root = %root.display(), "Discovery complete");
    Ok(records)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};
    use tempfile::tempdir;

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.relative_path.as_str()).collect()
    }

    #[test]
    fn finds_nested_files_in_stable_order() {
        let tmp = tempdir().unwrap();
        create_dir_all(tmp.path().join("src/module")).unwrap();
        write(tmp.path().join("b.txt"), "bb").unwrap();
        write(tmp.path().join("a.txt"), "a").unwrap();
        write(tmp.path().join("src/module/nested.md"), "nested").unwrap();

        let first = discover(tmp.path(), &DiscoverOptions::default()).unwrap();
        let second = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

        assert_eq!(names(&first), vec!["a.txt", "b.txt", "src/module/nested.md"]);
        assert_eq!(first, second);
        assert_eq!(first[1].size_bytes, 2);
        assert!(first[2].absolute_path.ends_with("src/module/nested.md"));
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let tmp = tempdir().unwrap();
        create_dir_all(tmp.path().join("empty/deeper")).unwrap();
        let records = discover(tmp.path(), &DiscoverOptions::default()).unwrap();
        assert!(records.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_excluded() {
        let tmp = tempdir().unwrap();
        write(tmp.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link.txt"))
            .unwrap();
        create_dir_all(tmp.path().join("dir")).unwrap();
        write(tmp.path().join("dir/inner.txt"), "inner").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("dir"), tmp.path().join("dirlink")).unwrap();

        let records = discover(tmp.path(), &DiscoverOptions::default()).unwrap();
        assert_eq!(names(&records), vec!["dir/inner.txt", "real.txt"]);
    }

    #[test]
    fn ignore_patterns_prune_directories_and_files() {
        let tmp = tempdir().unwrap();
        create_dir_all(tmp.path().join(".git/info")).unwrap();
        create_dir_all(tmp.path().join("target/deep")).unwrap();
        write(tmp.path().join(".git/info/config"), "").unwrap();
        write(tmp.path().join("target/deep/temp.obj"), "").unwrap();
        write(tmp.path().join("keep.rs"), "fn main() {}").unwrap();
        write(tmp.path().join("skip.lock"), "").unwrap();

        let options = DiscoverOptions {
            ignore: vec![r"^\.git$".into(), r"^target$".into(), r"\.lock$".into()],
        };
        let records = discover(tmp.path(), &options).unwrap();
        assert_eq!(names(&records), vec!["keep.rs"]);
    }

    #[test]
    fn missing_root_is_a_discovery_error() {
        let tmp = tempdir().unwrap();
        let err = discover(&tmp.path().join("nope"), &DiscoverOptions::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::Root { .. }));
    }

    #[test]
    fn file_root_is_a_discovery_error() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("file.txt");
        write(&file, "x").unwrap();
        let err = discover(&file, &DiscoverOptions::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotADirectory(_)));
    }

    #[test]
    fn bad_ignore_pattern_is_reported() {
        let tmp = tempdir().unwrap();
        let options = DiscoverOptions {
            ignore: vec!["(unclosed".into()],
        };
        let err = discover(tmp.path(), &options).unwrap_err();
        assert!(matches!(err, DiscoveryError::Pattern { .. }));
    }
}
