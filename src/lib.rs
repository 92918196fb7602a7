//! # repo-ingest
//!
//! Turns a source repository into semantically meaningful, annotated code
//! chunks and delivers them, in batches, to an external indexing sink.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌──────────────────────┐   ┌──────────┐   ┌─────────┐
//! │  Fetch  │──▶│  Select  │──▶│ Extract │ Fallback   │──▶│  Enrich  │──▶│  Emit   │──▶ sink
//! │ git/dir │   │ walk+skip│   │ tree-sitter│ windows │   │ git blame│   │ batches │
//! └─────────┘   └──────────┘   └──────────────────────┘   └──────────┘   └─────────┘
//! ```
//!
//! Data flows strictly forward. Extraction fans out over a bounded worker
//! pool; everything after it sees chunks in discovery order.
//!
//! ## Quick Start
//!
//! ```bash
//! repo-ingest run https://github.com/org/repo.git --output chunks.jsonl
//! repo-ingest run ./checkout --dry-run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Fatal and recoverable error types |
//! | [`fetch`] | Working-tree materialization |
//! | [`select`] | File discovery and filtering |
//! | [`language`] | Extension → language classification |
//! | [`extract`] | Per-language structural extraction |
//! | [`chunk`] | Fallback line-window chunking |
//! | [`history`] | Provenance from `git blame` |
//! | [`emit`] | Batching, retry and backpressure |
//! | [`sink`] | Sink trait and implementations |
//! | [`report`] | Run report |
//! | [`progress`] | Progress reporting on stderr |
//! | [`ingest`] | Pipeline entry point |

pub mod chunk;
pub mod config;
pub mod emit;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod ingest;
pub mod language;
pub mod models;
pub mod progress;
pub mod report;
pub mod select;
pub mod sink;
