//! Ingestion progress reporting.
//!
//! Reports what the pipeline is doing while a run is in flight: which tree
//! is being walked, how many files have been extracted, and how delivery is
//! going. Progress is emitted on **stderr** so stdout stays parseable for
//! scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Working tree is ready and selection has started.
    Discovering { source: String },
    /// `files` files extracted so far, yielding `chunks` chunks.
    Extracting { files: u64, chunks: u64 },
    /// Batch `batch` reached a terminal state.
    Delivering {
        batch: u64,
        succeeded: u64,
        failed: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the pipeline and the emitter.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  extracting  1,234 files, 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { source } => {
                format!("ingest {}  discovering...\n", source)
            }
            ProgressEvent::Extracting { files, chunks } => format!(
                "ingest  extracting  {} files, {} chunks\n",
                format_number(*files),
                format_number(*chunks)
            ),
            ProgressEvent::Delivering {
                batch,
                succeeded,
                failed,
            } => format!(
                "ingest  delivering  batch #{}  ({} ok, {} failed)\n",
                batch,
                format_number(*succeeded),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "source": source
            }),
            ProgressEvent::Extracting { files, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "extracting",
                "files": files,
                "chunks": chunks
            }),
            ProgressEvent::Delivering {
                batch,
                succeeded,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "delivering",
                "batch": batch,
                "succeeded": succeeded,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode. Shared by the pipeline and emitter.
    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
