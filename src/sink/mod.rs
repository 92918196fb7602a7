//! Delivery targets for enriched chunk batches.
//!
//! A [`Sink`] receives whole [`Batch`]es and answers with a [`SinkOutcome`]
//! instead of an error type, so the emitter can decide between retrying and
//! giving up without inspecting error chains.
//!
//! | Sink | Target |
//! |------|--------|
//! | [`HttpSink`] | `POST {"records": [...]}` to an indexing endpoint |
//! | [`JsonlSink`] | one JSON record per line, appended to a file |
//! | [`MemorySink`] | in-process buffer with scripted outcomes |

mod http;
mod jsonl;
mod memory;

pub use http::{classify_status, HttpSink};
pub use jsonl::JsonlSink;
pub use memory::MemorySink;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::SinkConfig;
use crate::models::{Batch, EnrichedChunk};

/// Result of one insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Accepted,
    /// Worth retrying: timeouts, connection resets, overload.
    TransientFailure(String),
    /// Retrying cannot help: malformed or rejected records.
    PermanentFailure(String),
}

/// How a failed batch failed, for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failures until attempts ran out.
    RetriesExhausted,
    Permanent,
}

/// An indexing service that durably stores batches.
///
/// Retried batches are sent again verbatim, so implementations must
/// tolerate seeing the same chunk ids more than once.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use repo_ingest::models::Batch;
/// use repo_ingest::sink::{Sink, SinkOutcome};
///
/// struct CountingSink;
///
/// #[async_trait]
/// impl Sink for CountingSink {
///     fn name(&self) -> &str { "counting" }
///
///     async fn insert(&self, batch: &Batch) -> SinkOutcome {
///         println!("batch {} with {} chunks", batch.sequence, batch.len());
///         SinkOutcome::Accepted
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Store every chunk of `batch`, all or nothing.
    async fn insert(&self, batch: &Batch) -> SinkOutcome;
}

/// Wire shape of one chunk.
#[derive(Debug, Serialize)]
pub struct ChunkRecord<'a> {
    pub chunk_id: &'a str,
    pub code_chunk: &'a str,
    pub filepath: &'a str,
    pub language: &'a str,
    pub function_name: &'a str,
    pub kind: &'a str,
    pub scope: Option<&'a str>,
    pub repo: &'a str,
    pub tree_reference: &'a str,
    pub last_modified: Option<String>,
    pub author: Option<&'a str>,
    pub commit_hash: Option<&'a str>,
    pub line_range: String,
    pub source_url: Option<String>,
}

impl<'a> From<&'a EnrichedChunk> for ChunkRecord<'a> {
    fn from(chunk: &'a EnrichedChunk) -> Self {
        Self {
            chunk_id: &chunk.chunk_id,
            code_chunk: &chunk.raw.text,
            filepath: &chunk.raw.file_path,
            language: chunk.raw.language.id(),
            function_name: &chunk.raw.name,
            kind: chunk.raw.kind.as_str(),
            scope: chunk.raw.scope.as_deref(),
            repo: &chunk.repository_url,
            tree_reference: &chunk.tree_reference,
            last_modified: chunk.last_modified.map(|t| t.to_rfc3339()),
            author: chunk.author.as_deref(),
            commit_hash: chunk.commit_hash.as_deref(),
            line_range: chunk.line_range(),
            source_url: chunk.web_url(),
        }
    }
}

/// Records for every chunk of a batch, in batch order.
pub fn records(batch: &Batch) -> Vec<ChunkRecord<'_>> {
    batch.chunks.iter().map(ChunkRecord::from).collect()
}

/// Build the sink described by `[sink]`.
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    match config.kind.as_str() {
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .context("sink.endpoint required for http sink")?;
            Ok(Arc::new(HttpSink::new(endpoint, config.token_env.as_deref())?))
        }
        "jsonl" => {
            let path = config
                .path
                .as_ref()
                .context("sink.path required for jsonl sink")?;
            Ok(Arc::new(JsonlSink::new(path)))
        }
        other => bail!("Unknown sink kind: '{}'. Must be http or jsonl.", other),
    }
}
