//! Run report and the per-stage accumulators that feed it.
//!
//! Every stage owns its accumulator for the length of one run and hands it
//! back when it finishes; [`IngestionReport::merge_*`] folds them together.
//! Nothing here is global.
//!
//! Stage timings are busy time: extraction sums per-file work across
//! workers, so it can exceed wall-clock `total`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{HistoryLookupFailure, ParseFailure};
use crate::select::SkippedFile;
use crate::sink::FailureKind;

/// Selection stage totals.
#[derive(Debug, Default, Clone)]
pub struct SelectionStats {
    pub files_scanned: usize,
    pub skipped: Vec<SkippedFile>,
    pub elapsed: Duration,
}

/// A file whose structural parse failed and was re-chunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailureRecord {
    pub file: String,
    #[serde(flatten)]
    pub failure: ParseFailure,
}

/// Extraction stage totals.
#[derive(Debug, Default, Clone)]
pub struct ExtractionStats {
    pub files_extracted: usize,
    pub parse_failures: Vec<ParseFailureRecord>,
    pub chunks_per_language: BTreeMap<String, usize>,
    pub fallback_chunks: usize,
    pub elapsed: Duration,
}

impl ExtractionStats {
    pub fn total_chunks(&self) -> usize {
        self.chunks_per_language.values().sum()
    }
}

/// History enrichment totals.
#[derive(Debug, Default, Clone)]
pub struct EnrichmentStats {
    pub enriched: usize,
    pub history_failures: Vec<HistoryLookupFailure>,
    pub elapsed: Duration,
}

/// A batch the sink never accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub sequence: u64,
    pub chunk_ids: Vec<String>,
    pub attempts: u32,
    pub kind: FailureKind,
    pub reason: String,
}

/// Delivery stage totals.
#[derive(Debug, Default, Clone)]
pub struct DeliveryStats {
    pub batches_formed: u64,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub failed: Vec<FailedBatch>,
    /// Batches dropped undelivered after cancellation.
    pub dropped: Vec<u64>,
    pub sink_calls: u64,
    pub chunks_delivered: usize,
    pub elapsed: Duration,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StageTimings {
    #[serde(rename = "fetch_ms", serialize_with = "as_millis")]
    pub fetch: Duration,
    #[serde(rename = "selection_ms", serialize_with = "as_millis")]
    pub selection: Duration,
    #[serde(rename = "extraction_ms", serialize_with = "as_millis")]
    pub extraction: Duration,
    #[serde(rename = "enrichment_ms", serialize_with = "as_millis")]
    pub enrichment: Duration,
    #[serde(rename = "delivery_ms", serialize_with = "as_millis")]
    pub delivery: Duration,
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,
}

/// Outcome of one [`crate::ingest::run`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestionReport {
    pub repository_url: String,
    pub tree_reference: String,
    pub dry_run: bool,
    pub cancelled: bool,

    pub files_scanned: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub files_extracted: usize,
    pub parse_failures: Vec<ParseFailureRecord>,

    pub chunks_per_language: BTreeMap<String, usize>,
    pub total_chunks: usize,
    pub fallback_chunks: usize,
    pub history_failures: Vec<HistoryLookupFailure>,

    pub batches_formed: u64,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub failed_batches: Vec<FailedBatch>,
    pub batches_dropped: Vec<u64>,
    pub sink_calls: u64,

    pub timings: StageTimings,
}

impl IngestionReport {
    pub fn new(repository_url: &str, tree_reference: &str, dry_run: bool) -> Self {
        Self {
            repository_url: repository_url.to_string(),
            tree_reference: tree_reference.to_string(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn merge_selection(&mut self, stats: SelectionStats) {
        self.files_scanned += stats.files_scanned;
        self.files_skipped.extend(stats.skipped);
        self.timings.selection += stats.elapsed;
    }

    pub fn merge_extraction(&mut self, stats: ExtractionStats) {
        self.files_extracted += stats.files_extracted;
        self.parse_failures.extend(stats.parse_failures);
        for (lang, n) in stats.chunks_per_language {
            *self.chunks_per_language.entry(lang).or_insert(0) += n;
        }
        self.fallback_chunks += stats.fallback_chunks;
        self.total_chunks = self.chunks_per_language.values().sum();
        self.timings.extraction += stats.elapsed;
    }

    pub fn merge_enrichment(&mut self, stats: EnrichmentStats) {
        self.history_failures.extend(stats.history_failures);
        self.timings.enrichment += stats.elapsed;
    }

    pub fn merge_delivery(&mut self, stats: DeliveryStats) {
        self.batches_formed += stats.batches_formed;
        self.batches_attempted += stats.batches_attempted;
        self.batches_succeeded += stats.batches_succeeded;
        self.failed_batches.extend(stats.failed);
        self.batches_dropped.extend(stats.dropped);
        self.sink_calls += stats.sink_calls;
        self.timings.delivery += stats.elapsed;
    }

    /// Whether every formed batch was accepted.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.failed_batches.is_empty()
            && self.batches_dropped.is_empty()
            && (self.dry_run || self.batches_succeeded == self.batches_formed)
    }
}

/// Print a run summary to stdout, as text or a single JSON document.
pub fn print_summary(report: &IngestionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.dry_run {
        println!("ingest {} (dry-run)", report.repository_url);
    } else {
        println!("ingest {}", report.repository_url);
    }
    println!("  reference: {}", report.tree_reference);
    println!("  files scanned: {}", report.files_scanned);
    println!("  files skipped: {}", report.files_skipped.len());
    for skipped in &report.files_skipped {
        println!("    {}  {}", skipped.path, skipped.reason);
    }
    println!("  parse failures: {}", report.parse_failures.len());
    for record in &report.parse_failures {
        match record.failure.line {
            Some(line) => println!("    {}:{}  {}", record.file, line, record.failure.reason),
            None => println!("    {}  {}", record.file, record.failure.reason),
        }
    }
    println!("  chunks: {}", report.total_chunks);
    for (lang, n) in &report.chunks_per_language {
        println!("    {:<12} {}", lang, n);
    }
    if !report.history_failures.is_empty() {
        println!("  history lookups failed: {}", report.history_failures.len());
    }
    println!("  batches formed: {}", report.batches_formed);
    if !report.dry_run {
        println!("  batches succeeded: {}", report.batches_succeeded);
        println!("  batches failed: {}", report.failed_batches.len());
        for failed in &report.failed_batches {
            println!(
                "    #{}  {} chunks, {} attempts, {:?}: {}",
                failed.sequence,
                failed.chunk_ids.len(),
                failed.attempts,
                failed.kind,
                failed.reason
            );
        }
    }
    if !report.batches_dropped.is_empty() {
        println!("  batches dropped: {}", report.batches_dropped.len());
    }
    let t = &report.timings;
    println!(
        "  time: fetch {}ms, select {}ms, extract {}ms, enrich {}ms, deliver {}ms, total {}ms",
        t.fetch.as_millis(),
        t.selection.as_millis(),
        t.extraction.as_millis(),
        t.enrichment.as_millis(),
        t.delivery.as_millis(),
        t.total.as_millis()
    );
    if report.cancelled {
        println!("cancelled");
    } else if report.is_complete() {
        println!("ok");
    } else {
        println!("partial");
    }
    Ok(())
}
