use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::DEFAULT_WINDOW_LINES;
use crate::models::{IngestionJob, DEFAULT_BATCH_SIZE, DEFAULT_EXCLUDE_DIRS, DEFAULT_EXTENSIONS};

/// Largest accepted `job.batch_size`.
pub const MAX_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub sink: Option<SinkConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_reference")]
    pub reference: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub extract_history: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            source: None,
            reference: default_reference(),
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
            batch_size: default_batch_size(),
            extract_history: false,
            dry_run: false,
        }
    }
}

fn default_reference() -> String {
    "main".to_string()
}
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
fn default_exclude_dirs() -> Vec<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_binary_sniff_bytes")]
    pub binary_sniff_bytes: usize,
    /// Extra globs matched against the `/`-separated relative path.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            binary_sniff_bytes: default_binary_sniff_bytes(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    1_048_576
}
fn default_binary_sniff_bytes() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_fallback_window_lines")]
    pub fallback_window_lines: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fallback_window_lines: default_fallback_window_lines(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_fallback_window_lines() -> usize {
    DEFAULT_WINDOW_LINES
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Keep the cloned working tree after the run.
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_shallow")]
    pub shallow: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            retain: false,
            shallow: default_shallow(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_fetch_timeout_secs() -> u64 {
    300
}
fn default_shallow() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_max_outstanding_batches")]
    pub max_outstanding_batches: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_outstanding_batches: default_max_outstanding_batches(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_attempt_timeout_secs() -> u64 {
    30
}
fn default_max_outstanding_batches() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// `http` or `jsonl`.
    pub kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token for the HTTP sink.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl SinkConfig {
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: "jsonl".to_string(),
            endpoint: None,
            token_env: None,
            path: Some(path.into()),
        }
    }
}

impl Config {
    /// Build the job for `source`, falling back to `[job] source`.
    pub fn job_for(&self, source: Option<&str>) -> Result<IngestionJob> {
        let source = source
            .map(str::to_string)
            .or_else(|| self.job.source.clone())
            .context("No repository source given (pass one or set job.source)")?;

        Ok(IngestionJob::new(source)
            .reference(self.job.reference.clone())
            .extensions(&self.job.extensions)
            .exclude_dirs(&self.job.exclude_dirs)
            .batch_size(self.job.batch_size)
            .extract_history(self.job.extract_history)
            .dry_run(self.job.dry_run))
    }

    pub fn validate(&self) -> Result<()> {
        // Validate job
        if self.job.batch_size == 0 {
            bail!("job.batch_size must be > 0");
        }
        if self.job.batch_size > MAX_BATCH_SIZE {
            bail!("job.batch_size must be <= {}", MAX_BATCH_SIZE);
        }
        if self
            .job
            .extensions
            .iter()
            .all(|e| e.trim().trim_start_matches('.').is_empty())
        {
            bail!("job.extensions must name at least one extension");
        }

        // Validate extraction
        if self.extraction.fallback_window_lines == 0 {
            bail!("extraction.fallback_window_lines must be > 0");
        }
        if self.extraction.workers == 0 {
            bail!("extraction.workers must be > 0");
        }

        // Validate delivery
        if self.delivery.max_attempts == 0 {
            bail!("delivery.max_attempts must be >= 1");
        }
        if self.delivery.attempt_timeout_secs == 0 {
            bail!("delivery.attempt_timeout_secs must be > 0");
        }
        if self.delivery.max_outstanding_batches == 0 {
            bail!("delivery.max_outstanding_batches must be >= 1");
        }
        if self.delivery.base_backoff_ms > self.delivery.max_backoff_ms {
            bail!("delivery.base_backoff_ms must not exceed delivery.max_backoff_ms");
        }

        // Validate sink
        if let Some(sink) = &self.sink {
            match sink.kind.as_str() {
                "http" => {
                    if sink.endpoint.as_deref().map_or(true, str::is_empty) {
                        bail!("sink.endpoint must be set when kind is 'http'");
                    }
                }
                "jsonl" => {
                    if sink.path.is_none() {
                        bail!("sink.path must be set when kind is 'jsonl'");
                    }
                }
                other => bail!("Unknown sink kind: '{}'. Must be http or jsonl.", other),
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
