// Run observer: the injected sink for every skip, drop and status decision
// the analyzers make. Replaces ad-hoc logging so tests can assert on it.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::errors::{ItemError, RunError};
use crate::core::types::{AnalysisTask, BatchStatus, Strategy};
use crate::utils::Metrics;

pub trait RunObserver: Send + Sync {
    fn run_started(&self, _strategy: Strategy, _items: usize) {}

    fn run_aborted(&self, _strategy: Strategy, _error: &RunError) {}

    fn item_analyzed(&self, _task: &AnalysisTask) {}

    /// Item left out of the run; `ResponseParse` errors carry the raw payload
    fn item_skipped(&self, _error: &ItemError) {}

    /// Provider result that could not be attributed to exactly one task
    fn result_dropped(&self, _custom_id: &str, _reason: &str) {}

    fn post_dropped(&self, _post_id: &str, _reason: &str) {}

    /// Every status read of a batch job, repeated statuses included
    fn batch_status(&self, _job_id: &str, _status: BatchStatus, _elapsed: Duration) {}

    fn wave_started(&self, _wave: usize, _size: usize) {}
}

/// Default observer: tracing events plus process metrics
#[derive(Clone, Default)]
pub struct TracingObserver {
    metrics: Option<Metrics>,
}

impl TracingObserver {
    pub fn new(metrics: Option<Metrics>) -> Self {
        Self { metrics }
    }
}

impl RunObserver for TracingObserver {
    fn run_started(&self, strategy: Strategy, items: usize) {
        info!(strategy = %strategy, items, "Analysis run started");
        if let Some(ref m) = self.metrics {
            m.record_run_started(strategy.as_str());
        }
    }

    fn run_aborted(&self, strategy: Strategy, error: &RunError) {
        warn!(strategy = %strategy, "Analysis run aborted: {}", error);
        if let Some(ref m) = self.metrics {
            m.record_run_aborted();
        }
    }

    fn item_analyzed(&self, task: &AnalysisTask) {
        debug!(custom_id = %task.custom_id, "Item analyzed");
        if let Some(ref m) = self.metrics {
            m.record_item_analyzed();
        }
    }

    fn item_skipped(&self, error: &ItemError) {
        match error {
            ItemError::ResponseParse { raw, .. } => {
                warn!(kind = error.kind(), raw = %raw, "Skipping item: {}", error)
            }
            _ => warn!(kind = error.kind(), "Skipping item: {}", error),
        }
        if let Some(ref m) = self.metrics {
            m.record_item_skipped(error.kind());
        }
    }

    fn result_dropped(&self, custom_id: &str, reason: &str) {
        warn!(custom_id, "Dropping result: {}", reason);
        if let Some(ref m) = self.metrics {
            m.record_result_dropped();
        }
    }

    fn post_dropped(&self, post_id: &str, reason: &str) {
        warn!(post_id, "Dropping post: {}", reason);
        if let Some(ref m) = self.metrics {
            m.record_post_dropped();
        }
    }

    fn batch_status(&self, job_id: &str, status: BatchStatus, elapsed: Duration) {
        info!(job_id, status = %status, "Batch job status after {:?}", elapsed);
        if let Some(ref m) = self.metrics {
            m.record_batch_poll();
        }
    }

    fn wave_started(&self, wave: usize, size: usize) {
        debug!(wave, size, "Dispatching wave");
    }
}

#[cfg(test)]
pub(crate) use recording::{Event, RecordingObserver};
