//! # repo-ingest CLI
//!
//! Thin shell over [`repo_ingest::ingest`]: builds an [`IngestionJob`] from a
//! config file plus flags, picks a sink, runs the pipeline and prints the
//! report.
//!
//! ## Usage
//!
//! ```bash
//! repo-ingest run https://github.com/org/repo.git --branch develop --output chunks.jsonl
//! repo-ingest run ./local/checkout --dry-run --json
//! repo-ingest --config ./ingest.toml run
//! repo-ingest languages
//! ```
//!
//! Logs go to stderr (`RUST_LOG` controls the level); the summary goes to
//! stdout. The exit status is non-zero when any batch was not delivered.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use repo_ingest::config::{self, Config, SinkConfig};
use repo_ingest::ingest::Pipeline;
use repo_ingest::language::Language;
use repo_ingest::models::IngestionJob;
use repo_ingest::progress::ProgressMode;
use repo_ingest::report::print_summary;
use repo_ingest::sink::{create_sink, MemorySink, Sink};

#[derive(Parser)]
#[command(
    name = "repo-ingest",
    about = "Turn a source repository into annotated code chunks and deliver them to an index",
    version
)]
struct Cli {
    /// Path to a configuration file (TOML). Built-in defaults apply without one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one repository.
    ///
    /// SOURCE is a remote URL (https://, http://, ssh://, git@, file://) or a
    /// local directory. Without SOURCE, `job.source` from the config is used.
    Run {
        source: Option<String>,

        /// Branch, tag or commit to ingest.
        #[arg(long)]
        branch: Option<String>,

        /// Comma-separated extension allow-list, e.g. `py,rs,go`.
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        /// Comma-separated directory names to skip at any depth.
        #[arg(long, value_delimiter = ',')]
        exclude_dirs: Option<Vec<String>>,

        /// Chunks per sink insert.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Attach author, commit and timestamp from git history.
        #[arg(long)]
        extract_git_info: bool,

        /// Run every stage but never call the sink.
        #[arg(long)]
        dry_run: bool,

        /// Keep the cloned working tree after the run.
        #[arg(long)]
        keep_tree: bool,

        /// Append records to this JSONL file instead of the configured sink.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr: `human`, `json` or `off`. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// List supported languages and their extensions.
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Languages => {
            for language in Language::SUPPORTED {
                println!("{:<12} {}", language.id(), language.extensions().join(", "));
            }
        }
        Commands::Run {
            source,
            branch,
            extensions,
            exclude_dirs,
            batch_size,
            extract_git_info,
            dry_run,
            keep_tree,
            output,
            json,
            progress,
        } => {
            let mut cfg = match &cli.config {
                Some(path) => config::load_config(path)?,
                None => Config::default(),
            };
            if keep_tree {
                cfg.fetch.retain = true;
            }
            if let Some(path) = output {
                cfg.sink = Some(SinkConfig::jsonl(path));
            }

            let mut job = cfg.job_for(source.as_deref())?;
            if let Some(branch) = branch {
                job = job.reference(branch);
            }
            if let Some(extensions) = extensions {
                job = job.extensions(&extensions);
            }
            if let Some(dirs) = exclude_dirs {
                job = job.exclude_dirs(&dirs);
            }
            if let Some(size) = batch_size {
                if size == 0 || size > config::MAX_BATCH_SIZE {
                    bail!("--batch-size must be between 1 and {}", config::MAX_BATCH_SIZE);
                }
                job = job.batch_size(size);
            }
            if extract_git_info {
                job = job.extract_history(true);
            }
            if dry_run {
                job = job.dry_run(true);
            }
            if job.extensions.is_empty() {
                bail!("--extensions must name at least one extension");
            }

            let sink = pick_sink(&cfg, &job)?;
            let mode = match progress.as_deref() {
                Some(name) => match ProgressMode::parse(name) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: '{}'. Must be human, json or off.", name),
                },
                None => ProgressMode::default_for_tty(),
            };

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupt received, finishing in-flight work");
                        cancel.cancel();
                    }
                }
            });

            let pipeline = Pipeline::new(cfg, sink).with_progress(mode.reporter());
            let report = pipeline.run_with_cancel(&job, cancel).await?;
            print_summary(&report, json)?;

            if !report.is_complete() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn pick_sink(cfg: &Config, job: &IngestionJob) -> Result<Arc<dyn Sink>> {
    match &cfg.sink {
        Some(sink) => create_sink(sink),
        None if job.dry_run => Ok(Arc::new(MemorySink::new())),
        None => bail!("No sink configured: pass --output <file>, set [sink] in the config, or use --dry-run"),
    }
}
