//! Provenance from version-control history.
//!
//! [`GitHistory`] runs `git blame --line-porcelain` once per file and keeps
//! the most recent file's result, since chunks arrive grouped by file. For
//! a line range it picks the newest commit (by committer time) among the
//! range's committed lines.
//!
//! The [`Enricher`] never fails a chunk: a failed lookup is recorded and the
//! chunk goes on with empty author and commit, and the file's mtime as its
//! last-modified time.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::HistoryLookupFailure;
use crate::models::{CandidateFile, EnrichedChunk, Provenance, RawChunk};
use crate::report::EnrichmentStats;

/// Version-control history lookup.
pub trait HistorySource: Send + Sync {
    /// Most recent commit touching any line of `lines` (1-based, inclusive).
    fn blame(&self, file_path: &str, lines: (usize, usize)) -> Result<Provenance, HistoryLookupFailure>;
}

#[derive(Debug, Clone)]
struct BlameLine {
    commit: String,
    author: Option<String>,
    time: Option<i64>,
    boundary: bool,
}

impl BlameLine {
    fn is_committed(&self) -> bool {
        !self.boundary && !self.commit.bytes().all(|b| b == b'0')
    }
}

/// [`HistorySource`] backed by `git blame` in a working tree.
pub struct GitHistory {
    root: PathBuf,
    cache: Mutex<Option<(String, Arc<Vec<BlameLine>>)>>,
}

impl GitHistory {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    fn file_blame(&self, file_path: &str) -> Result<Arc<Vec<BlameLine>>, String> {
        if let Ok(cache) = self.cache.lock() {
            if let Some((path, lines)) = cache.as_ref() {
                if path == file_path {
                    return Ok(Arc::clone(lines));
                }
            }
        }

        let output = Command::new("git")
            .args(["blame", "--line-porcelain", "--root", "--"])
            .arg(file_path)
            .current_dir(&self.root)
            .output()
            .map_err(|e| format!("failed to run git blame: {}", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(stderr.trim().to_string());
        }

        let lines = Arc::new(parse_porcelain(&String::from_utf8_lossy(&output.stdout)));
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some((file_path.to_string(), Arc::clone(&lines)));
        }
        Ok(lines)
    }
}

impl HistorySource for GitHistory {
    fn blame(&self, file_path: &str, lines: (usize, usize)) -> Result<Provenance, HistoryLookupFailure> {
        let fail = |reason: &str| HistoryLookupFailure::new(file_path, lines, reason);

        let blame = self.file_blame(file_path).map_err(|e| fail(e.as_str()))?;
        let (start, end) = lines;
        if start == 0 || end < start || end > blame.len() {
            return Err(fail("line range outside blamed file"));
        }

        blame[start - 1..end]
            .iter()
            .filter(|l| l.is_committed())
            .max_by_key(|l| l.time.unwrap_or(i64::MIN))
            .map(|l| Provenance {
                author: l.author.clone(),
                commit_hash: Some(l.commit.clone()),
                timestamp: l.time.and_then(|t| Utc.timestamp_opt(t, 0).single()),
            })
            .ok_or_else(|| fail("no committed history for range"))
    }
}

/// Parse `git blame --line-porcelain` into one entry per final line.
fn parse_porcelain(out: &str) -> Vec<BlameLine> {
    let mut lines = Vec::new();
    let mut current: Option<BlameLine> = None;

    for line in out.lines() {
        if line.starts_with('\t') {
            if let Some(entry) = current.take() {
                lines.push(entry);
            }
            continue;
        }
        if let Some(entry) = current.as_mut() {
            if let Some(author) = line.strip_prefix("author ") {
                entry.author = Some(author.to_string());
            } else if let Some(ts) = line.strip_prefix("committer-time ") {
                entry.time = ts.trim().parse().ok();
            } else if line == "boundary" {
                entry.boundary = true;
            }
            continue;
        }
        let hash = line.split_whitespace().next().unwrap_or_default();
        if hash.len() >= 40 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
            current = Some(BlameLine {
                commit: hash.to_string(),
                author: None,
                time: None,
                boundary: false,
            });
        }
    }
    lines
}

/// Appends provenance to raw chunks.
pub struct Enricher {
    repository_url: String,
    tree_reference: String,
    history: Option<Arc<dyn HistorySource>>,
}

impl Enricher {
    pub fn new(
        repository_url: &str,
        tree_reference: &str,
        history: Option<Arc<dyn HistorySource>>,
    ) -> Self {
        Self {
            repository_url: repository_url.to_string(),
            tree_reference: tree_reference.to_string(),
            history,
        }
    }

    /// Enrich one file's chunks, in order.
    pub fn enrich_file(
        &self,
        file: &CandidateFile,
        chunks: Vec<RawChunk>,
        stats: &mut EnrichmentStats,
    ) -> Vec<EnrichedChunk> {
        let started = std::time::Instant::now();
        let mtime = file_mtime(&file.absolute_path);
        let enriched = chunks
            .into_iter()
            .map(|raw| self.enrich(raw, mtime, stats))
            .collect();
        stats.elapsed += started.elapsed();
        enriched
    }

    fn enrich(
        &self,
        raw: RawChunk,
        mtime: Option<DateTime<Utc>>,
        stats: &mut EnrichmentStats,
    ) -> EnrichedChunk {
        let lines = (raw.start_line, raw.end_line);
        let mut chunk = EnrichedChunk::new(raw, &self.repository_url, &self.tree_reference);
        chunk.last_modified = mtime;
        stats.enriched += 1;

        let Some(history) = &self.history else {
            return chunk;
        };
        match history.blame(chunk.file_path(), lines) {
            Ok(provenance) => chunk.with_provenance(provenance),
            Err(failure) => {
                tracing::debug!(%failure, "history lookup failed");
                stats.history_failures.push(failure);
                chunk
            }
        }
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).single()
}
