//! Core data models that flow through the ingestion pipeline.
//!
//! Data moves strictly forward:
//! [`IngestionJob`] → [`CandidateFile`] → [`RawChunk`] → [`EnrichedChunk`] → [`Batch`].
//! Enrichment only appends metadata; extracted text and line ranges are never
//! rewritten after extraction.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::language::{normalize_extension, Language};

/// Extensions ingested when the caller does not name any.
pub const DEFAULT_EXTENSIONS: &[&str] = &["py", "js", "ts", "java", "go", "rs", "cpp", "c", "h"];

/// Directory names pruned from every walk by default.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "build",
    "dist",
];

/// Chunks per batch when the caller does not choose.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// One ingestion request.
///
/// Built by the caller and only ever borrowed by the pipeline.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    /// Remote URL, `file://` URL, or local directory.
    pub source: String,
    /// Branch, tag, or commit hash to materialize.
    pub reference: String,
    /// Normalized extension allow-list (lowercase, no leading dot).
    pub extensions: BTreeSet<String>,
    /// Directory names excluded anywhere in the tree.
    pub exclude_dirs: HashSet<String>,
    pub batch_size: usize,
    /// Attach authorship and commit metadata from history.
    pub extract_history: bool,
    /// Run every stage but never call the sink.
    pub dry_run: bool,
}

impl IngestionJob {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: "main".to_string(),
            extensions: DEFAULT_EXTENSIONS
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect(),
            batch_size: DEFAULT_BATCH_SIZE,
            extract_history: false,
            dry_run: false,
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn exclude_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude_dirs = dirs
            .into_iter()
            .map(|d| d.as_ref().trim().trim_matches('/').to_string())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn extract_history(mut self, enabled: bool) -> Self {
        self.extract_history = enabled;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}

/// A file chosen for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Path relative to the working-tree root, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub language: Language,
}

/// Structural category of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    ModuleFallback,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::ModuleFallback => "module-fallback",
        }
    }
}

/// One extracted unit before enrichment.
///
/// `text` is exactly lines `start_line..=end_line` (1-based, inclusive) of
/// the originating file, without the final line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawChunk {
    pub kind: ChunkKind,
    pub name: String,
    /// Qualified name of the enclosing definition, if any.
    pub scope: Option<String>,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: Language,
    pub file_path: String,
}

/// Authorship of a line range, as resolved from history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub author: Option<String>,
    pub commit_hash: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A [`RawChunk`] with provenance appended. The unit of batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedChunk {
    pub chunk_id: String,
    #[serde(flatten)]
    pub raw: RawChunk,
    pub repository_url: String,
    /// Commit the working tree was materialized at.
    pub tree_reference: String,
    pub author: Option<String>,
    pub commit_hash: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl EnrichedChunk {
    pub fn new(raw: RawChunk, repository_url: &str, tree_reference: &str) -> Self {
        let chunk_id = chunk_id(repository_url, &raw);
        Self {
            chunk_id,
            raw,
            repository_url: repository_url.to_string(),
            tree_reference: tree_reference.to_string(),
            author: None,
            commit_hash: None,
            last_modified: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.author = provenance.author;
        self.commit_hash = provenance.commit_hash;
        if provenance.timestamp.is_some() {
            self.last_modified = provenance.timestamp;
        }
        self
    }

    pub fn file_path(&self) -> &str {
        &self.raw.file_path
    }

    pub fn line_range(&self) -> String {
        format!("{}-{}", self.raw.start_line, self.raw.end_line)
    }

    /// Browsable URL for the chunk's lines when the host is recognizable.
    pub fn web_url(&self) -> Option<String> {
        web_url(
            &self.repository_url,
            &self.tree_reference,
            &self.raw.file_path,
            (self.raw.start_line, self.raw.end_line),
        )
    }
}

/// An ordered group of chunks bounded by the job's batch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based, contiguous per run.
    pub sequence: u64,
    pub chunks: Vec<EnrichedChunk>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk_id.clone()).collect()
    }
}

/// Deterministic id: SHA-256 over `repo:path:name:start_line`, first 16 hex chars.
pub fn chunk_id(repository_url: &str, raw: &RawChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository_url.as_bytes());
    hasher.update(b":");
    hasher.update(raw.file_path.as_bytes());
    hasher.update(b":");
    hasher.update(raw.name.as_bytes());
    hasher.update(b":");
    hasher.update(raw.start_line.to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Build a web URL for GitHub and GitLab remotes.
fn web_url(repo_url: &str, sha: &str, relative_path: &str, lines: (usize, usize)) -> Option<String> {
    let anchor = format!("#L{}-L{}", lines.0, lines.1);

    if let Some(rest) = repo_url.strip_prefix("git@github.com:") {
        let repo = rest.trim_end_matches(".git");
        return Some(format!(
            "https://github.com/{repo}/blob/{sha}/{relative_path}{anchor}"
        ));
    }

    if repo_url.starts_with("https://github.com/") {
        let base = repo_url.trim_end_matches(".git");
        return Some(format!("{base}/blob/{sha}/{relative_path}{anchor}"));
    }

    if let Some(rest) = repo_url.strip_prefix("git@gitlab.com:") {
        let repo = rest.trim_end_matches(".git");
        return Some(format!(
            "https://gitlab.com/{repo}/-/blob/{sha}/{relative_path}{anchor}"
        ));
    }

    if repo_url.starts_with("https://gitlab.com/") {
        let base = repo_url.trim_end_matches(".git");
        return Some(format!("{base}/-/blob/{sha}/{relative_path}{anchor}"));
    }

    None
}
