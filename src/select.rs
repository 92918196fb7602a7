//! Working-tree walk: extension allow-list, directory exclusion, size and
//! binary checks.
//!
//! The walk prunes an excluded directory before descending into it, so no
//! entry below it is ever stat'ed. Entries are visited in file-name order,
//! which makes the candidate sequence deterministic for a given tree.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::config::SelectionConfig;
use crate::error::SelectionError;
use crate::language::{classify, normalize_extension};
use crate::models::{CandidateFile, IngestionJob};

/// Why a file matching the allow-list was not extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    TooLarge { size: u64, limit: u64 },
    Binary,
    Unreadable { detail: String },
    /// Extraction or enrichment of the file aborted.
    Failed { stage: String, detail: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooLarge { size, limit } => {
                write!(f, "too large ({} bytes > {} limit)", size, limit)
            }
            SkipReason::Binary => write!(f, "binary content"),
            SkipReason::Unreadable { detail } => write!(f, "unreadable: {}", detail),
            SkipReason::Failed { stage, detail } => write!(f, "{} failed: {}", stage, detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// One outcome of the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Candidate(CandidateFile),
    Skipped(SkippedFile),
}

/// Walks a working tree and yields [`Selection`]s.
///
/// Owns its configuration so it can move onto a blocking thread.
#[derive(Debug, Clone)]
pub struct FileSelector {
    root: PathBuf,
    extensions: BTreeSet<String>,
    exclude_dirs: HashSet<String>,
    exclude_globs: GlobSet,
    max_file_bytes: u64,
    binary_sniff_bytes: usize,
}

impl FileSelector {
    pub fn new(
        root: &Path,
        job: &IngestionJob,
        config: &SelectionConfig,
    ) -> Result<Self, SelectionError> {
        std::fs::read_dir(root).map_err(|source| SelectionError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })?;
        if job.extensions.is_empty() {
            return Err(SelectionError::NoExtensions);
        }

        Ok(Self {
            root: root.to_path_buf(),
            extensions: job.extensions.clone(),
            exclude_dirs: job.exclude_dirs.clone(),
            exclude_globs: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
            binary_sniff_bytes: config.binary_sniff_bytes,
        })
    }

    /// A fresh walk over the tree. Each call restarts from the root.
    pub fn iter(&self) -> impl Iterator<Item = Selection> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded_dir(entry))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.select(&entry),
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| self.relative(p))
                        .unwrap_or_default();
                    tracing::warn!(path = %path, error = %err, "skipping unreadable entry");
                    Some(Selection::Skipped(SkippedFile {
                        path,
                        reason: SkipReason::Unreadable {
                            detail: err.to_string(),
                        },
                    }))
                }
            })
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.exclude_dirs.contains(name))
    }

    fn select(&self, entry: &DirEntry) -> Option<Selection> {
        if !entry.file_type().is_file() {
            return None;
        }
        let path = entry.path();
        let relative = self.relative(path);

        if self.exclude_globs.is_match(&relative) {
            return None;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)?;
        if !self.extensions.contains(&ext) {
            return None;
        }

        let skipped = |reason| Some(Selection::Skipped(SkippedFile {
            path: relative.clone(),
            reason,
        }));

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                return skipped(SkipReason::Unreadable {
                    detail: e.to_string(),
                })
            }
        };
        if size > self.max_file_bytes {
            tracing::debug!(file = %relative, size, "skipping oversized file");
            return skipped(SkipReason::TooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        match looks_binary(path, self.binary_sniff_bytes) {
            Ok(true) => {
                tracing::debug!(file = %relative, "skipping binary file");
                return skipped(SkipReason::Binary);
            }
            Ok(false) => {}
            Err(e) => {
                return skipped(SkipReason::Unreadable {
                    detail: e.to_string(),
                })
            }
        }

        Some(Selection::Candidate(CandidateFile {
            language: classify(path),
            relative_path: relative,
            absolute_path: path.to_path_buf(),
            size,
        }))
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Null-byte sniff over the first `limit` bytes.
fn looks_binary(path: &Path, limit: usize) -> std::io::Result<bool> {
    let mut buf = Vec::with_capacity(limit);
    File::open(path)?
        .take(limit as u64)
        .read_to_end(&mut buf)?;
    Ok(buf.contains(&0))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, SelectionError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| SelectionError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|source| SelectionError::InvalidPattern {
            pattern: patterns.join(","),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn candidates(selector: &FileSelector) -> Vec<String> {
        selector
            .iter()
            .filter_map(|s| match s {
                Selection::Candidate(c) => Some(c.relative_path),
                Selection::Skipped(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_excluded_dirs_are_recursive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/app.js", b"function a() {}\n");
        write(tmp.path(), "node_modules/sub/dir/file.js", b"function b() {}\n");
        write(tmp.path(), "lib/node_modules/x.js", b"function c() {}\n");

        let job = IngestionJob::new(".");
        let selector = FileSelector::new(tmp.path(), &job, &SelectionConfig::default()).unwrap();
        assert_eq!(candidates(&selector), vec!["src/app.js"]);
    }

    #[test]
    fn test_file_named_like_excluded_dir_is_kept() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "build.py", b"def f():\n    pass\n");

        let job = IngestionJob::new(".");
        let selector = FileSelector::new(tmp.path(), &job, &SelectionConfig::default()).unwrap();
        assert_eq!(candidates(&selector), vec!["build.py"]);
    }

    #[test]
    fn test_extension_matching_ignores_case_and_dot() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "A.PY", b"x = 1\n");
        write(tmp.path(), "b.py", b"x = 1\n");
        write(tmp.path(), "c.md", b"# doc\n");

        let job = IngestionJob::new(".").extensions([".Py"]);
        let selector = FileSelector::new(tmp.path(), &job, &SelectionConfig::default()).unwrap();
        assert_eq!(candidates(&selector), vec!["A.PY", "b.py"]);
    }

    #[test]
    fn test_oversized_and_binary_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "big.py", &vec![b'x'; 2048]);
        write(tmp.path(), "blob.c", b"int x;\0\0\0");
        write(tmp.path(), "ok.c", b"int x;\n");

        let job = IngestionJob::new(".");
        let config = SelectionConfig {
            max_file_bytes: 1024,
            ..SelectionConfig::default()
        };
        let selector = FileSelector::new(tmp.path(), &job, &config).unwrap();
        let all: Vec<Selection> = selector.iter().collect();

        assert_eq!(all.len(), 3);
        assert_eq!(
            all[0],
            Selection::Skipped(SkippedFile {
                path: "big.py".into(),
                reason: SkipReason::TooLarge {
                    size: 2048,
                    limit: 1024
                },
            })
        );
        assert_eq!(
            all[1],
            Selection::Skipped(SkippedFile {
                path: "blob.c".into(),
                reason: SkipReason::Binary,
            })
        );
        match &all[2] {
            Selection::Candidate(c) => {
                assert_eq!(c.relative_path, "ok.c");
                assert_eq!(c.language, Language::C);
            }
            other => panic!("expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/a.rs", b"fn a() {}\n");
        write(tmp.path(), "src/generated/b.rs", b"fn b() {}\n");

        let job = IngestionJob::new(".");
        let config = SelectionConfig {
            exclude_globs: vec!["**/generated/**".into()],
            ..SelectionConfig::default()
        };
        let selector = FileSelector::new(tmp.path(), &job, &config).unwrap();
        assert_eq!(candidates(&selector), vec!["src/a.rs"]);
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let tmp = TempDir::new().unwrap();
        for name in ["z.go", "a.go", "m/b.go"] {
            write(tmp.path(), name, b"package x\n");
        }
        let job = IngestionJob::new(".");
        let selector = FileSelector::new(tmp.path(), &job, &SelectionConfig::default()).unwrap();
        let first = candidates(&selector);
        assert_eq!(first, vec!["a.go", "m/b.go", "z.go"]);
        assert_eq!(candidates(&selector), first);
    }

    #[test]
    fn test_configuration_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        let job = IngestionJob::new(".");
        assert!(matches!(
            FileSelector::new(&missing, &job, &SelectionConfig::default()),
            Err(SelectionError::RootUnreadable { .. })
        ));

        let empty = IngestionJob::new(".").extensions(Vec::<String>::new());
        assert!(matches!(
            FileSelector::new(tmp.path(), &empty, &SelectionConfig::default()),
            Err(SelectionError::NoExtensions)
        ));

        let bad = SelectionConfig {
            exclude_globs: vec!["a[".into()],
            ..SelectionConfig::default()
        };
        assert!(matches!(
            FileSelector::new(tmp.path(), &job, &bad),
            Err(SelectionError::InvalidPattern { .. })
        ));
    }
}
