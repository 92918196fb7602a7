//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`FetchError`] and [`SelectionError`] are fatal to a run and surface
//! from [`crate::ingest::run`] as `Err`. Every other failure is contained by
//! the stage that hit it and recorded in the
//! [`IngestionReport`](crate::report::IngestionReport).

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::language::Language;

/// Fatal errors returned by the pipeline entry point.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// The working tree could not be materialized. Nothing can be ingested.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid repository locator '{0}': expected https://, http://, ssh://, git@, file:// or an existing directory")]
    InvalidLocator(String),

    #[error("repository '{locator}' is unreachable: {detail}")]
    Unreachable { locator: String, detail: String },

    #[error("reference '{reference}' does not exist in '{locator}'")]
    ReferenceNotFound { locator: String, reference: String },

    #[error("insufficient disk space while fetching '{0}'")]
    DiskFull(String),

    #[error("fetching '{locator}' timed out after {timeout:?}")]
    Timeout { locator: String, timeout: Duration },

    #[error("git executable not available: {0}")]
    GitUnavailable(#[source] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Selection could not start because the configuration is unusable.
///
/// Per-file problems (oversized, binary, unreadable files) are skips, not
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("cannot read working tree root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid exclude glob '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("extension allow-list is empty")]
    NoExtensions,
}

/// A structural extractor could not build a clean syntax tree.
///
/// Recoverable: the file is re-chunked by the fallback chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{language} parse failed: {reason}")]
pub struct ParseFailure {
    pub language: Language,
    pub reason: String,
    /// First line (1-based) holding a syntax error, when one was located.
    pub line: Option<usize>,
}

impl ParseFailure {
    pub fn new(language: Language, reason: impl Into<String>) -> Self {
        Self {
            language,
            reason: reason.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// Version-control history had nothing to say about a line range.
///
/// Recoverable: the chunk proceeds with empty provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("no history for {file_path}:{start_line}-{end_line}: {reason}")]
pub struct HistoryLookupFailure {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub reason: String,
}

impl HistoryLookupFailure {
    pub fn new(file_path: &str, lines: (usize, usize), reason: impl Into<String>) -> Self {
        Self {
            file_path: file_path.to_string(),
            start_line: lines.0,
            end_line: lines.1,
            reason: reason.into(),
        }
    }
}
