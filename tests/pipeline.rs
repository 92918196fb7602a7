//! End-to-end pipeline runs over local directories with an in-memory sink.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repo_ingest::chunk::line_slice;
use repo_ingest::config::Config;
use repo_ingest::error::HistoryLookupFailure;
use repo_ingest::history::HistorySource;
use repo_ingest::ingest::{self, Pipeline};
use repo_ingest::models::{Batch, ChunkKind, EnrichedChunk, IngestionJob, Provenance};
use repo_ingest::select::SkipReason;
use repo_ingest::sink::{FailureKind, MemorySink, Sink, SinkOutcome};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.delivery.base_backoff_ms = 1;
    config.delivery.max_backoff_ms = 4;
    config.extraction.workers = 4;
    config
}

fn job(root: &Path) -> IngestionJob {
    IngestionJob::new(root.to_str().unwrap())
}

fn delivered(sink: &MemorySink) -> Vec<EnrichedChunk> {
    sink.accepted()
        .into_iter()
        .flat_map(|batch| batch.chunks)
        .collect()
}

/// a.py: two functions; b.py: one class with two methods; c.txt: 50 lines.
fn scenario_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "a.py",
        "def first():\n    return 1\n\n\ndef second():\n    return 2\n",
    );
    write(
        tmp.path(),
        "b.py",
        "class Shape:\n    def area(self):\n        return 0\n\n    def name(self):\n        return 'shape'\n",
    );
    let notes: String = (1..=50).map(|i| format!("note {i}\n")).collect();
    write(tmp.path(), "c.txt", &notes);
    tmp
}

fn scenario_job(root: &Path) -> IngestionJob {
    job(root)
        .extensions(["py", "txt"])
        .batch_size(2)
}

#[tokio::test]
async fn three_file_scenario_forms_three_full_batches() {
    let tmp = scenario_tree();
    let sink = Arc::new(MemorySink::new());

    let report = ingest::run(&scenario_job(tmp.path()), &fast_config(), sink.clone())
        .await
        .unwrap();

    let sizes: Vec<usize> = sink.accepted().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 2, 2]);
    assert_eq!(report.total_chunks, 6);
    assert_eq!(report.batches_formed, 3);
    assert_eq!(report.batches_succeeded, 3);
    assert!(report.is_complete());

    let chunks = delivered(&sink);
    let names: Vec<&str> = chunks.iter().map(|c| c.raw.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "Shape", "area", "name", "c.txt:chunk_1"]);
    assert_eq!(chunks[2].raw.kind, ChunkKind::Class);
    assert_eq!((chunks[2].raw.start_line, chunks[2].raw.end_line), (1, 6));
    assert_eq!(chunks[3].raw.kind, ChunkKind::Method);
    assert_eq!(chunks[5].raw.kind, ChunkKind::ModuleFallback);
    assert_eq!((chunks[5].raw.start_line, chunks[5].raw.end_line), (1, 50));

    assert_eq!(report.chunks_per_language.get("python"), Some(&5));
    assert_eq!(report.chunks_per_language.get("unknown"), Some(&1));
}

#[tokio::test]
async fn dry_run_counts_chunks_without_sink_calls() {
    let tmp = scenario_tree();
    let sink = Arc::new(MemorySink::new());

    let report = ingest::run(
        &scenario_job(tmp.path()).dry_run(true),
        &fast_config(),
        sink.clone(),
    )
    .await
    .unwrap();

    assert_eq!(report.total_chunks, 6);
    assert_eq!(report.batches_formed, 3);
    assert_eq!(report.sink_calls, 0);
    assert_eq!(sink.calls(), 0);
    assert!(report.dry_run);
    assert!(report.is_complete());
}

#[tokio::test]
async fn transient_failures_within_bound_still_succeed() {
    let tmp = scenario_tree();
    let sink = Arc::new(MemorySink::new());
    sink.script(
        0,
        (0..3).map(|_| SinkOutcome::TransientFailure("connection reset".into())),
    );

    let report = ingest::run(&scenario_job(tmp.path()), &fast_config(), sink.clone())
        .await
        .unwrap();

    assert_eq!(sink.calls_for(0), 4);
    assert_eq!(report.batches_succeeded, 3);
    assert!(report.failed_batches.is_empty());
    assert_eq!(report.sink_calls, 6);
}

#[tokio::test]
async fn exhausted_retries_are_reported() {
    let tmp = scenario_tree();
    let sink = Arc::new(MemorySink::new());
    sink.script(
        1,
        (0..10).map(|_| SinkOutcome::TransientFailure("503".into())),
    );
    let mut config = fast_config();
    config.delivery.max_attempts = 3;

    let report = ingest::run(&scenario_job(tmp.path()), &config, sink.clone())
        .await
        .unwrap();

    assert_eq!(sink.calls_for(1), 3);
    assert_eq!(report.failed_batches.len(), 1);
    let failed = &report.failed_batches[0];
    assert_eq!(failed.sequence, 1);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.kind, FailureKind::RetriesExhausted);
    assert_eq!(failed.chunk_ids.len(), 2);
    assert_eq!(report.batches_succeeded, 2);
    assert!(!report.is_complete());
}

#[tokio::test]
async fn permanent_failure_does_not_stop_later_batches() {
    let tmp = TempDir::new().unwrap();
    let body: String = (1..=10)
        .map(|i| format!("def f{i}():\n    return {i}\n\n"))
        .collect();
    write(tmp.path(), "many.py", &body);

    let sink = Arc::new(MemorySink::new());
    sink.reject_sequence(2, "malformed record");

    let report = ingest::run(&job(tmp.path()).batch_size(2), &fast_config(), sink.clone())
        .await
        .unwrap();

    assert_eq!(report.batches_formed, 5);
    assert_eq!(report.batches_attempted, 5);
    assert_eq!(report.batches_succeeded, 4);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].sequence, 2);
    assert_eq!(report.failed_batches[0].kind, FailureKind::Permanent);
    assert_eq!(sink.calls_for(2), 1);
    assert_eq!(sink.calls_for(3), 1);
    assert_eq!(sink.calls_for(4), 1);
}

#[tokio::test]
async fn excluded_directories_are_pruned_at_any_depth() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "node_modules/sub/dir/file.js", "function hidden() {}\n");
    write(tmp.path(), "src/vendor/build/gen.js", "function generated() {}\n");
    write(tmp.path(), "src/app.js", "function visible() {\n  return 1;\n}\n");

    let sink = Arc::new(MemorySink::new());
    let report = ingest::run(&job(tmp.path()), &fast_config(), sink.clone())
        .await
        .unwrap();

    let paths: Vec<String> = delivered(&sink)
        .iter()
        .map(|c| c.raw.file_path.clone())
        .collect();
    assert_eq!(paths, vec!["src/app.js"]);
    assert_eq!(report.files_scanned, 1);
}

#[tokio::test]
async fn binary_and_oversized_files_are_skipped_with_reasons() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "ok.py", "def ok():\n    pass\n");
    fs::write(tmp.path().join("blob.c"), b"int x;\0\0\0binary").unwrap();
    write(tmp.path(), "huge.go", &"// padding\n".repeat(200));

    let mut config = fast_config();
    config.selection.max_file_bytes = 1000;
    let sink = Arc::new(MemorySink::new());
    let report = ingest::run(&job(tmp.path()), &config, sink.clone())
        .await
        .unwrap();

    assert_eq!(report.files_scanned, 3);
    assert_eq!(report.files_extracted, 1);
    let mut skipped: Vec<(String, SkipReason)> = report
        .files_skipped
        .iter()
        .map(|s| (s.path.clone(), s.reason.clone()))
        .collect();
    skipped.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(skipped[0], ("blob.c".to_string(), SkipReason::Binary));
    assert!(matches!(skipped[1].1, SkipReason::TooLarge { limit: 1000, .. }));
}

#[tokio::test]
async fn parse_failure_falls_back_and_is_reported() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "broken.py", "def broken(:\n    return\n");
    write(tmp.path(), "fine.py", "def fine():\n    return 1\n");

    let sink = Arc::new(MemorySink::new());
    let report = ingest::run(&job(tmp.path()), &fast_config(), sink.clone())
        .await
        .unwrap();

    assert_eq!(report.parse_failures.len(), 1);
    assert_eq!(report.parse_failures[0].file, "broken.py");
    let chunks = delivered(&sink);
    assert_eq!(chunks[0].raw.kind, ChunkKind::ModuleFallback);
    assert_eq!(chunks[0].raw.file_path, "broken.py");
    assert_eq!(chunks[1].raw.name, "fine");
    assert_eq!(report.fallback_chunks, 1);
}

#[tokio::test]
async fn chunk_text_round_trips_to_source_lines() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "lib.rs",
        "/// Doc.\n#[derive(Debug)]\npub struct P {\n    x: i32,\n}\n\nimpl P {\n    fn x(&self) -> i32 {\n        self.x\n    }\n}\n",
    );
    write(
        tmp.path(),
        "main.go",
        "package main\n\nfunc main() {\n\tgo func() {\n\t\tprintln(1)\n\t}()\n}\n",
    );
    write(
        tmp.path(),
        "app.ts",
        "export class A {\n  run(): number {\n    return 1;\n  }\n}\nconst f = () => {\n  return 2;\n};\n",
    );

    let sink = Arc::new(MemorySink::new());
    ingest::run(&job(tmp.path()), &fast_config(), sink.clone())
        .await
        .unwrap();

    let chunks = delivered(&sink);
    assert!(chunks.len() >= 7);
    for chunk in &chunks {
        let source = fs::read_to_string(tmp.path().join(&chunk.raw.file_path)).unwrap();
        assert_eq!(
            line_slice(&source, chunk.raw.start_line, chunk.raw.end_line),
            Some(chunk.raw.text.as_str()),
            "{} {}",
            chunk.raw.file_path,
            chunk.raw.name
        );
    }
}

#[tokio::test]
async fn reruns_yield_identical_chunk_sequences() {
    let tmp = TempDir::new().unwrap();
    for i in 0..12 {
        write(
            tmp.path(),
            &format!("pkg{}/mod{i}.py", i % 3),
            &format!("def f{i}():\n    return {i}\n\nclass C{i}:\n    def m(self):\n        pass\n"),
        );
    }

    let mut runs = Vec::new();
    for _ in 0..2 {
        let sink = Arc::new(MemorySink::new());
        ingest::run(&job(tmp.path()).batch_size(5), &fast_config(), sink.clone())
            .await
            .unwrap();
        let ids: Vec<(String, String)> = delivered(&sink)
            .into_iter()
            .map(|c| (c.chunk_id, c.raw.text))
            .collect();
        runs.push(ids);
    }
    assert_eq!(runs[0].len(), 36);
    assert_eq!(runs[0], runs[1]);
}

struct FixedHistory;

impl HistorySource for FixedHistory {
    fn blame(
        &self,
        file_path: &str,
        lines: (usize, usize),
    ) -> Result<Provenance, HistoryLookupFailure> {
        if file_path.starts_with("new/") {
            return Err(HistoryLookupFailure::new(file_path, lines, "not committed"));
        }
        Ok(Provenance {
            author: Some("Ada".into()),
            commit_hash: Some("a".repeat(40)),
            timestamp: None,
        })
    }
}

#[tokio::test]
async fn history_source_supplies_provenance() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "old.py", "def old():\n    pass\n");
    write(tmp.path(), "new/fresh.py", "def fresh():\n    pass\n");

    let sink = Arc::new(MemorySink::new());
    let report = Pipeline::new(fast_config(), sink.clone())
        .with_history(Arc::new(FixedHistory))
        .run(&job(tmp.path()).extract_history(true))
        .await
        .unwrap();

    let chunks = delivered(&sink);
    let fresh = chunks.iter().find(|c| c.raw.name == "fresh").unwrap();
    let old = chunks.iter().find(|c| c.raw.name == "old").unwrap();
    assert_eq!(old.author.as_deref(), Some("Ada"));
    assert!(fresh.author.is_none());
    assert!(fresh.commit_hash.is_none());
    assert!(fresh.last_modified.is_some());
    assert_eq!(report.history_failures.len(), 1);
    assert_eq!(report.history_failures[0].file_path, "new/fresh.py");
}

#[tokio::test]
async fn history_is_not_consulted_unless_requested() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "old.py", "def old():\n    pass\n");

    let sink = Arc::new(MemorySink::new());
    Pipeline::new(fast_config(), sink.clone())
        .with_history(Arc::new(FixedHistory))
        .run(&job(tmp.path()))
        .await
        .unwrap();

    assert!(delivered(&sink)[0].author.is_none());
}

#[tokio::test]
async fn cancelled_run_reports_partial_completion() {
    let tmp = scenario_tree();
    let sink = Arc::new(MemorySink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Pipeline::new(fast_config(), sink.clone())
        .run_with_cancel(&scenario_job(tmp.path()), cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn invalid_locator_is_fatal() {
    let sink = Arc::new(MemorySink::new());
    let err = ingest::run(
        &IngestionJob::new("not-a-repo-anywhere"),
        &fast_config(),
        sink,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("invalid repository locator"));
}

fn one_function_per_file(root: &Path, count: usize) {
    for i in 0..count {
        write(root, &format!("f{i:02}.py"), &format!("def f{i}():\n    return {i}\n"));
    }
}

#[tokio::test]
async fn cancellation_mid_run_drops_undelivered_batches() {
    let tmp = TempDir::new().unwrap();
    one_function_per_file(tmp.path(), 20);
    let sink = Arc::new(MemorySink::new().with_delay(Duration::from_millis(100)));
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel.cancel();
        }
    });

    let pipeline = Pipeline::new(fast_config(), sink.clone());
    let job = job(tmp.path()).batch_size(1);
    let report = tokio::time::timeout(Duration::from_secs(10), pipeline.run_with_cancel(&job, cancel))
        .await
        .expect("cancelled run did not finish")
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert!(report.batches_succeeded >= 1);
    assert!(report.batches_succeeded < 20);
    assert!(!report.batches_dropped.is_empty());
    assert!(report.failed_batches.is_empty());
    assert_eq!(
        report.batches_succeeded + report.batches_dropped.len() as u64,
        report.batches_formed
    );
    // Delivered batches form a prefix of the sequence.
    let sequences: Vec<u64> = sink.accepted().iter().map(|b| b.sequence).collect();
    let expected: Vec<u64> = (0..sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
}

/// Holds every insert until the gate opens.
struct GateSink {
    open: watch::Sender<bool>,
    accepted: Mutex<Vec<u64>>,
}

impl GateSink {
    fn new() -> Self {
        Self {
            open: watch::channel(false).0,
            accepted: Mutex::new(Vec::new()),
        }
    }

    fn open(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl Sink for GateSink {
    fn name(&self) -> &str {
        "gate"
    }

    async fn insert(&self, batch: &Batch) -> SinkOutcome {
        let mut open = self.open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return SinkOutcome::TransientFailure("gate dropped".into());
        }
        self.accepted.lock().unwrap().push(batch.sequence);
        SinkOutcome::Accepted
    }
}

/// Counts enriched chunks; each one is about to be batched.
#[derive(Default)]
struct CountingHistory {
    lookups: AtomicUsize,
}

impl HistorySource for CountingHistory {
    fn blame(
        &self,
        _file_path: &str,
        _lines: (usize, usize),
    ) -> Result<Provenance, HistoryLookupFailure> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Provenance::default())
    }
}

#[tokio::test]
async fn blocked_sink_suspends_production() {
    let tmp = TempDir::new().unwrap();
    one_function_per_file(tmp.path(), 20);
    let sink = Arc::new(GateSink::new());
    let history = Arc::new(CountingHistory::default());
    let mut config = fast_config();
    config.delivery.max_outstanding_batches = 1;

    let run = tokio::spawn({
        let pipeline = Pipeline::new(config, sink.clone()).with_history(history.clone());
        let job = job(tmp.path()).batch_size(1).extract_history(true);
        async move { pipeline.run(&job).await }
    });

    while sink.open.receiver_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    // One batch in the sink, one queued, one waiting on the full channel.
    let produced = history.lookups.load(Ordering::SeqCst);
    assert!(produced <= 3, "{produced} chunks produced while the sink was blocked");

    sink.open();
    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("run did not finish after the sink unblocked")
        .unwrap()
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.batches_formed, 20);
    assert_eq!(history.lookups.load(Ordering::SeqCst), 20);
    assert_eq!(*sink.accepted.lock().unwrap(), (0..20).collect::<Vec<u64>>());
}

/// Panics on one file, as a broken history backend would.
struct PanickingHistory;

impl HistorySource for PanickingHistory {
    fn blame(
        &self,
        file_path: &str,
        _lines: (usize, usize),
    ) -> Result<Provenance, HistoryLookupFailure> {
        if file_path == "boom.py" {
            panic!("history backend crashed");
        }
        Ok(Provenance::default())
    }
}

#[tokio::test]
async fn failed_enrichment_is_reported_as_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "boom.py", "def boom():\n    pass\n");
    write(tmp.path(), "ok.py", "def ok():\n    pass\n");

    let sink = Arc::new(MemorySink::new());
    let report = Pipeline::new(fast_config(), sink.clone())
        .with_history(Arc::new(PanickingHistory))
        .run(&job(tmp.path()).extract_history(true))
        .await
        .unwrap();

    let chunks = delivered(&sink);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].raw.name, "ok");
    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.files_extracted, 1);
    assert_eq!(report.files_skipped.len(), 1);
    assert_eq!(report.files_skipped[0].path, "boom.py");
    assert!(matches!(
        &report.files_skipped[0].reason,
        SkipReason::Failed { stage, .. } if stage == "enrichment"
    ));
}
