//! Append-only JSON Lines file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{records, Sink, SinkOutcome};
use crate::models::Batch;

pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl Sink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn insert(&self, batch: &Batch) -> SinkOutcome {
        // One write per batch so a retry never follows a half-written batch.
        let mut buf = Vec::new();
        for record in records(batch) {
            if let Err(e) = serde_json::to_writer(&mut buf, &record) {
                return SinkOutcome::PermanentFailure(e.to_string());
            }
            buf.push(b'\n');
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&buf).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => SinkOutcome::Accepted,
            Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::NotFound) => {
                SinkOutcome::PermanentFailure(format!("{}: {}", self.path.display(), e))
            }
            Err(e) => SinkOutcome::TransientFailure(format!("{}: {}", self.path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::models::{ChunkKind, EnrichedChunk, RawChunk};
    use tempfile::TempDir;

    fn batch(sequence: u64, names: &[&str]) -> Batch {
        let chunks = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                EnrichedChunk::new(
                    RawChunk {
                        kind: ChunkKind::Function,
                        name: name.to_string(),
                        scope: None,
                        text: format!("def {name}():\n    pass"),
                        start_line: i * 3 + 1,
                        end_line: i * 3 + 2,
                        language: Language::Python,
                        file_path: "a.py".into(),
                    },
                    "repo",
                    "abc",
                )
            })
            .collect();
        Batch { sequence, chunks }
    }

    #[tokio::test]
    async fn appends_one_line_per_chunk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        let sink = JsonlSink::new(&path);

        assert_eq!(sink.insert(&batch(0, &["a", "b"])).await, SinkOutcome::Accepted);
        assert_eq!(sink.insert(&batch(1, &["c"])).await, SinkOutcome::Accepted);

        let content = std::fs::read_to_string(&path).unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["function_name"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn missing_directory_is_permanent() {
        let tmp = TempDir::new().unwrap();
        let sink = JsonlSink::new(&tmp.path().join("nope").join("out.jsonl"));
        assert!(matches!(
            sink.insert(&batch(0, &["a"])).await,
            SinkOutcome::PermanentFailure(_)
        ));
    }
}
