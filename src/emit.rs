//! Batching and delivery to the sink.
//!
//! [`Batcher`] cuts the enriched-chunk stream into fixed-size batches in
//! arrival order. [`Emitter`] delivers them one at a time, driving each
//! batch through [`DeliveryState`]:
//!
//! ```text
//! Pending → Attempting ─┬─ accepted ──────────────→ Succeeded
//!              ▲        ├─ permanent ─────────────→ PermanentlyFailed
//!              │        └─ transient ─┬─ attempts left → Retrying ─┐
//!              │                      └─ exhausted ─→ PermanentlyFailed
//!              └──────────────── after backoff ───────────────────┘
//! ```
//!
//! Batches reach the emitter through a bounded channel; when the sink falls
//! behind, the channel fills and the producer suspends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DeliveryConfig;
use crate::models::{Batch, EnrichedChunk};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::report::{DeliveryStats, FailedBatch};
use crate::sink::{FailureKind, Sink, SinkOutcome};

/// Groups chunks into batches of exactly `size`, except the last.
#[derive(Debug)]
pub struct Batcher {
    size: usize,
    next_sequence: u64,
    pending: Vec<EnrichedChunk>,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            next_sequence: 0,
            pending: Vec::new(),
        }
    }

    /// Add a chunk; returns a batch once `size` chunks are pending.
    pub fn push(&mut self, chunk: EnrichedChunk) -> Option<Batch> {
        self.pending.push(chunk);
        if self.pending.len() >= self.size {
            return Some(self.cut());
        }
        None
    }

    /// The final, possibly short, batch.
    pub fn finish(mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.cut())
        }
    }

    fn cut(&mut self) -> Batch {
        let chunks = std::mem::take(&mut self.pending);
        let batch = Batch {
            sequence: self.next_sequence,
            chunks,
        };
        self.next_sequence += 1;
        batch
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Delivery lifecycle of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed transiently; another will follow.
    Retrying { attempt: u32, reason: String },
    Succeeded { attempts: u32 },
    PermanentlyFailed {
        attempts: u32,
        kind: FailureKind,
        reason: String,
    },
}

impl DeliveryState {
    /// Next state. `outcome` is the sink's answer when leaving `Attempting`
    /// and is ignored otherwise.
    pub fn advance(&self, policy: &RetryPolicy, outcome: Option<SinkOutcome>) -> Self {
        use DeliveryState::*;
        match self {
            Pending => Attempting { attempt: 1 },
            Attempting { attempt } => match outcome {
                Some(SinkOutcome::Accepted) => Succeeded { attempts: *attempt },
                Some(SinkOutcome::PermanentFailure(reason)) => PermanentlyFailed {
                    attempts: *attempt,
                    kind: FailureKind::Permanent,
                    reason,
                },
                Some(SinkOutcome::TransientFailure(reason)) if *attempt >= policy.max_attempts => {
                    PermanentlyFailed {
                        attempts: *attempt,
                        kind: FailureKind::RetriesExhausted,
                        reason,
                    }
                }
                Some(SinkOutcome::TransientFailure(reason)) => Retrying {
                    attempt: *attempt,
                    reason,
                },
                None => self.clone(),
            },
            Retrying { attempt, .. } => Attempting {
                attempt: attempt + 1,
            },
            Succeeded { .. } | PermanentlyFailed { .. } => self.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Succeeded { .. } | DeliveryState::PermanentlyFailed { .. }
        )
    }
}

/// Serial batch delivery with retry. Owns the delivery accumulator.
pub struct Emitter {
    sink: Arc<dyn Sink>,
    policy: RetryPolicy,
    dry_run: bool,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
}

impl Emitter {
    pub fn new(
        sink: Arc<dyn Sink>,
        policy: RetryPolicy,
        dry_run: bool,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            sink,
            policy,
            dry_run,
            cancel,
            progress,
        }
    }

    /// Consume batches until the channel closes.
    pub async fn run(self, mut batches: mpsc::Receiver<Batch>) -> DeliveryStats {
        let mut stats = DeliveryStats::default();

        while let Some(batch) = batches.recv().await {
            stats.batches_formed += 1;

            if self.cancel.is_cancelled() {
                tracing::info!(batch = batch.sequence, "dropping batch after cancellation");
                stats.dropped.push(batch.sequence);
                continue;
            }
            if self.dry_run {
                tracing::debug!(batch = batch.sequence, chunks = batch.len(), "dry-run batch");
                continue;
            }

            let started = Instant::now();
            let result = self.deliver(&batch, &mut stats).await;
            stats.elapsed += started.elapsed();

            match result {
                Some(DeliveryState::Succeeded { attempts }) => {
                    tracing::info!(
                        batch = batch.sequence,
                        chunks = batch.len(),
                        attempts,
                        sink = self.sink.name(),
                        "batch delivered"
                    );
                    stats.batches_succeeded += 1;
                    stats.chunks_delivered += batch.len();
                }
                Some(DeliveryState::PermanentlyFailed {
                    attempts,
                    kind,
                    reason,
                }) => {
                    tracing::error!(
                        batch = batch.sequence,
                        attempts,
                        reason = %reason,
                        "batch permanently failed"
                    );
                    stats.failed.push(FailedBatch {
                        sequence: batch.sequence,
                        chunk_ids: batch.chunk_ids(),
                        attempts,
                        kind,
                        reason,
                    });
                }
                _ => {
                    tracing::info!(batch = batch.sequence, "abandoning retries after cancellation");
                    stats.dropped.push(batch.sequence);
                }
            }

            self.progress.report(ProgressEvent::Delivering {
                batch: batch.sequence,
                succeeded: stats.batches_succeeded,
                failed: stats.failed.len() as u64,
            });
        }

        stats
    }

    /// Drive one batch to a terminal state. `None` if cancelled while
    /// waiting to retry.
    pub async fn deliver(&self, batch: &Batch, stats: &mut DeliveryStats) -> Option<DeliveryState> {
        stats.batches_attempted += 1;
        let mut state = DeliveryState::Pending.advance(&self.policy, None);

        loop {
            match &state {
                DeliveryState::Attempting { attempt } => {
                    tracing::debug!(batch = batch.sequence, attempt = *attempt, "inserting batch");
                    stats.sink_calls += 1;
                    let outcome =
                        match tokio::time::timeout(self.policy.attempt_timeout, self.sink.insert(batch))
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => SinkOutcome::TransientFailure(format!(
                                "attempt timed out after {:?}",
                                self.policy.attempt_timeout
                            )),
                        };
                    state = state.advance(&self.policy, Some(outcome));
                }
                DeliveryState::Retrying { attempt, reason } => {
                    let delay = self.policy.backoff(*attempt);
                    tracing::warn!(
                        batch = batch.sequence,
                        attempt = *attempt,
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "transient sink failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return None,
                    }
                    state = state.advance(&self.policy, None);
                }
                DeliveryState::Pending => {
                    state = state.advance(&self.policy, None);
                }
                DeliveryState::Succeeded { .. } | DeliveryState::PermanentlyFailed { .. } => {
                    return Some(state);
                }
            }
        }
    }
}
