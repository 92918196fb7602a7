//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: fetch → select → extract (or fallback-chunk) →
//! enrich → batch → deliver. Stages are connected by bounded channels:
//!
//! ```text
//! selector ──(blocking thread)──▶ files ──buffered(workers)──▶ extracted
//!     ──▶ enricher ──▶ batcher ──mpsc(max_outstanding)──▶ emitter ──▶ sink
//! ```
//!
//! Extraction runs on the blocking pool, `workers` files at a time, and its
//! results come back in selection order, so the chunk sequence is the same on
//! every run over the same tree. When the emitter falls behind, the batch
//! channel fills, the enricher stops pulling, and selection stalls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::fallback_chunks;
use crate::config::Config;
use crate::emit::{Batcher, Emitter, RetryPolicy};
use crate::error::{IngestError, ParseFailure};
use crate::extract;
use crate::fetch::{self, WorkingTree};
use crate::history::{Enricher, GitHistory, HistorySource};
use crate::models::{CandidateFile, EnrichedChunk, IngestionJob, RawChunk};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::report::{
    DeliveryStats, EnrichmentStats, ExtractionStats, IngestionReport, ParseFailureRecord,
    SelectionStats,
};
use crate::select::{FileSelector, Selection, SkipReason, SkippedFile};
use crate::sink::Sink;

/// Emit an `Extracting` progress event every this many files.
const PROGRESS_EVERY: u64 = 100;

/// Ingest `job` into `sink` with the settings in `config`.
///
/// Only fetch and selection setup errors are returned as `Err`; everything
/// else is recorded in the report.
pub async fn run(
    job: &IngestionJob,
    config: &Config,
    sink: Arc<dyn Sink>,
) -> Result<IngestionReport, IngestError> {
    Pipeline::new(config.clone(), sink).run(job).await
}

/// A configured pipeline. Reusable across jobs.
pub struct Pipeline {
    config: Config,
    sink: Arc<dyn Sink>,
    history: Option<Arc<dyn HistorySource>>,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            sink,
            history: None,
            progress: Arc::new(NoProgress),
        }
    }

    /// Use `history` instead of `git blame` in the working tree.
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, job: &IngestionJob) -> Result<IngestionReport, IngestError> {
        self.run_with_cancel(job, CancellationToken::new()).await
    }

    /// Run `job`, stopping early once `cancel` fires.
    ///
    /// After cancellation no new file is dispatched to extraction, files
    /// already being extracted finish, and batches not yet handed to the sink
    /// are dropped and listed in the report.
    pub async fn run_with_cancel(
        &self,
        job: &IngestionJob,
        cancel: CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let started = Instant::now();

        tracing::info!(source = %job.source, reference = %job.reference, "fetching");
        let tree = fetch::fetch(job, &self.config.fetch).await?;
        let fetch_elapsed = started.elapsed();
        tracing::info!(
            root = %tree.root().display(),
            reference = %tree.reference(),
            "working tree ready"
        );

        let outcome = self.ingest_tree(job, &tree, cancel).await;

        let retained = tree.is_retained();
        let root = tree.root().to_path_buf();
        if let Err(e) = tree.release() {
            tracing::warn!(root = %root.display(), error = %e, "failed to remove working tree");
        } else if retained {
            tracing::info!(root = %root.display(), "working tree retained");
        }

        let mut report = outcome?;
        report.timings.fetch = fetch_elapsed;
        report.timings.total = started.elapsed();
        Ok(report)
    }

    async fn ingest_tree(
        &self,
        job: &IngestionJob,
        tree: &WorkingTree,
        cancel: CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let selector = FileSelector::new(tree.root(), job, &self.config.selection)?;
        let mut report = IngestionReport::new(tree.repository_url(), tree.reference(), job.dry_run);

        self.progress.report(ProgressEvent::Discovering {
            source: job.source.clone(),
        });

        let workers = self.config.extraction.workers.max(1);
        let window = self.config.extraction.fallback_window_lines;

        // Selection
        let (file_tx, file_rx) = mpsc::channel::<CandidateFile>(workers * 2);
        let selection = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || select_files(&selector, file_tx, &cancel)
        });

        // Extraction, in selection order
        let files = stream::unfold((file_rx, cancel.clone()), |(mut rx, cancel)| async move {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                file = rx.recv() => file,
            };
            next.map(|file| (file, (rx, cancel)))
        });
        let extracted = files
            .map(move |file| {
                let path = file.relative_path.clone();
                let task = tokio::task::spawn_blocking(move || extract_file(file, window));
                async move { (path, task.await) }
            })
            .buffered(workers);
        let mut extracted = Box::pin(extracted);

        // Delivery
        let (batch_tx, batch_rx) =
            mpsc::channel(self.config.delivery.max_outstanding_batches.max(1));
        let emitter = Emitter::new(
            Arc::clone(&self.sink),
            RetryPolicy::from_config(&self.config.delivery),
            job.dry_run,
            cancel.clone(),
            Arc::clone(&self.progress),
        );
        let delivery = tokio::spawn(emitter.run(batch_rx));

        // Enrichment and batching
        let enricher = Arc::new(Enricher::new(
            tree.repository_url(),
            tree.reference(),
            self.history_for(job, tree),
        ));
        let mut extraction = ExtractionStats::default();
        let mut enrichment = EnrichmentStats::default();
        let mut late_skips = Vec::new();
        let mut batcher = Batcher::new(job.batch_size);
        let mut emitter_gone = false;

        while let Some((path, joined)) = extracted.next().await {
            let mut file = match joined {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!(file = %path, error = %e, "extraction task failed");
                    late_skips.push(task_failed(path, "extraction", &e));
                    continue;
                }
            };
            extraction.elapsed += file.elapsed;

            if let Some(detail) = file.unreadable.take() {
                tracing::warn!(
                    file = %file.candidate.relative_path,
                    error = %detail,
                    "failed to read file"
                );
                late_skips.push(SkippedFile {
                    path: file.candidate.relative_path,
                    reason: SkipReason::Unreadable { detail },
                });
                continue;
            }

            let raw = std::mem::take(&mut file.chunks);
            let produced = raw.len();
            let chunks = match enrich(&enricher, file.candidate.clone(), raw).await {
                Ok((chunks, stats)) => {
                    enrichment.enriched += stats.enriched;
                    enrichment.history_failures.extend(stats.history_failures);
                    enrichment.elapsed += stats.elapsed;
                    chunks
                }
                Err(e) => {
                    let path = file.candidate.relative_path;
                    tracing::error!(file = %path, error = %e, "enrichment task failed");
                    late_skips.push(task_failed(path, "enrichment", &e));
                    continue;
                }
            };
            record_extraction(&mut extraction, &file, produced);

            for chunk in chunks {
                if let Some(batch) = batcher.push(chunk) {
                    if batch_tx.send(batch).await.is_err() {
                        emitter_gone = true;
                        break;
                    }
                }
            }
            if emitter_gone {
                tracing::error!("batch emitter stopped early");
                break;
            }

            let files_done = extraction.files_extracted as u64;
            if files_done % PROGRESS_EVERY == 0 {
                self.progress.report(ProgressEvent::Extracting {
                    files: files_done,
                    chunks: extraction.total_chunks() as u64,
                });
            }
        }

        if let Some(batch) = batcher.finish() {
            if !emitter_gone {
                let _ = batch_tx.send(batch).await;
            }
        }
        drop(batch_tx);

        self.progress.report(ProgressEvent::Extracting {
            files: extraction.files_extracted as u64,
            chunks: extraction.total_chunks() as u64,
        });

        let delivery_stats = delivery.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "batch emitter task failed");
            DeliveryStats::default()
        });
        // The extraction stream is done, so the receiver is gone and the
        // selector thread unblocks.
        drop(extracted);
        let mut selection_stats = selection.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "selection task failed");
            SelectionStats::default()
        });
        selection_stats.skipped.extend(late_skips);

        report.merge_selection(selection_stats);
        report.merge_extraction(extraction);
        report.merge_enrichment(enrichment);
        report.merge_delivery(delivery_stats);
        report.cancelled = cancel.is_cancelled();

        tracing::info!(
            files = report.files_extracted,
            chunks = report.total_chunks,
            batches = report.batches_formed,
            failed = report.failed_batches.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    fn history_for(&self, job: &IngestionJob, tree: &WorkingTree) -> Option<Arc<dyn HistorySource>> {
        if !job.extract_history {
            return None;
        }
        if let Some(history) = &self.history {
            return Some(Arc::clone(history));
        }
        if !tree.has_history() {
            tracing::warn!("working tree has no version-control history; provenance will be empty");
        }
        Some(Arc::new(GitHistory::new(tree.root())))
    }
}

/// Walk the tree and feed candidates to the extraction stream.
fn select_files(
    selector: &FileSelector,
    files: mpsc::Sender<CandidateFile>,
    cancel: &CancellationToken,
) -> SelectionStats {
    let mut stats = SelectionStats::default();
    let mut walk = selector.iter();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let started = Instant::now();
        let next = walk.next();
        stats.elapsed += started.elapsed();

        match next {
            Some(Selection::Candidate(file)) => {
                stats.files_scanned += 1;
                if files.blocking_send(file).is_err() {
                    break;
                }
            }
            Some(Selection::Skipped(skipped)) => {
                stats.files_scanned += 1;
                stats.skipped.push(skipped);
            }
            None => break,
        }
    }
    stats
}

/// Result of extracting one file on a blocking thread.
struct ExtractedFile {
    candidate: CandidateFile,
    chunks: Vec<RawChunk>,
    parse_failure: Option<ParseFailure>,
    fallback: bool,
    unreadable: Option<String>,
    elapsed: Duration,
}

fn extract_file(candidate: CandidateFile, window: usize) -> ExtractedFile {
    let started = Instant::now();
    let mut out = ExtractedFile {
        candidate,
        chunks: Vec::new(),
        parse_failure: None,
        fallback: false,
        unreadable: None,
        elapsed: Duration::ZERO,
    };

    let bytes = match std::fs::read(&out.candidate.absolute_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            out.unreadable = Some(e.to_string());
            out.elapsed = started.elapsed();
            return out;
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    if text.trim().is_empty() {
        out.elapsed = started.elapsed();
        return out;
    }

    let path = out.candidate.relative_path.as_str();
    let language = out.candidate.language;
    if language.has_extractor() {
        match extract::extract(language, path, &text) {
            Ok(chunks) => out.chunks = chunks,
            Err(failure) => {
                tracing::debug!(file = %path, %failure, "parse failed, falling back");
                out.chunks = fallback_chunks(path, &text, language, window);
                out.parse_failure = Some(failure);
                out.fallback = true;
            }
        }
    } else {
        out.chunks = fallback_chunks(path, &text, language, window);
        out.fallback = true;
    }

    out.elapsed = started.elapsed();
    out
}

/// Count a file whose `chunks` chunks made it through enrichment.
fn record_extraction(stats: &mut ExtractionStats, file: &ExtractedFile, chunks: usize) {
    stats.files_extracted += 1;
    *stats
        .chunks_per_language
        .entry(file.candidate.language.id().to_string())
        .or_insert(0) += chunks;
    if file.fallback {
        stats.fallback_chunks += chunks;
    }
    if let Some(failure) = &file.parse_failure {
        stats.parse_failures.push(ParseFailureRecord {
            file: file.candidate.relative_path.clone(),
            failure: failure.clone(),
        });
    }
}

/// Enrich one file's chunks off the async workers; history lookups shell out.
async fn enrich(
    enricher: &Arc<Enricher>,
    candidate: CandidateFile,
    chunks: Vec<RawChunk>,
) -> Result<(Vec<EnrichedChunk>, EnrichmentStats), tokio::task::JoinError> {
    let enricher = Arc::clone(enricher);
    tokio::task::spawn_blocking(move || {
        let mut stats = EnrichmentStats::default();
        let chunks = enricher.enrich_file(&candidate, chunks, &mut stats);
        (chunks, stats)
    })
    .await
}

fn task_failed(path: String, stage: &str, error: &tokio::task::JoinError) -> SkippedFile {
    SkippedFile {
        path,
        reason: SkipReason::Failed {
            stage: stage.to_string(),
            detail: error.to_string(),
        },
    }
}
