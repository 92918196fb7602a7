//! In-memory [`Sink`] for dry runs and tests.
//!
//! Outcomes can be scripted per batch sequence; unscripted attempts are
//! accepted. Accepted batches are kept in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Sink, SinkOutcome};
use crate::models::Batch;

#[derive(Default)]
struct State {
    /// Sequence number of every insert call, in call order.
    calls: Vec<u64>,
    accepted: Vec<Batch>,
    script: HashMap<u64, VecDeque<SinkOutcome>>,
    reject_all: HashMap<u64, String>,
}

#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every insert.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer the next attempts for batch `sequence` with `outcomes`, in order.
    pub fn script(&self, sequence: u64, outcomes: impl IntoIterator<Item = SinkOutcome>) {
        if let Ok(mut state) = self.state.lock() {
            state
                .script
                .entry(sequence)
                .or_default()
                .extend(outcomes);
        }
    }

    /// Permanently reject every attempt for batch `sequence`.
    pub fn reject_sequence(&self, sequence: u64, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_all.insert(sequence, reason.to_string());
        }
    }

    /// Total insert calls.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.calls.len()).unwrap_or(0)
    }

    /// Insert calls made for batch `sequence`.
    pub fn calls_for(&self, sequence: u64) -> usize {
        self.state
            .lock()
            .map(|s| s.calls.iter().filter(|&&c| c == sequence).count())
            .unwrap_or(0)
    }

    /// Accepted batches in arrival order.
    pub fn accepted(&self) -> Vec<Batch> {
        self.state
            .lock()
            .map(|s| s.accepted.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, batch: &Batch) -> SinkOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.calls.push(batch.sequence);

        if let Some(reason) = state.reject_all.get(&batch.sequence) {
            return SinkOutcome::PermanentFailure(reason.clone());
        }
        let outcome = state
            .script
            .get_mut(&batch.sequence)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SinkOutcome::Accepted);
        if outcome == SinkOutcome::Accepted {
            state.accepted.push(batch.clone());
        }
        outcome
    }
}
