use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::config::BatchJobConfig;
use crate::core::errors::{ProviderError, RunError, RunResult};
use crate::core::types::{
    AnalysisItem, BatchJob, BatchStatus, CostSummary, PostAggregate, Strategy,
};
use crate::orchestration::aggregator::PostAggregator;
use crate::orchestration::analyzer::{validate_items, Analyzer};
use crate::orchestration::observer::RunObserver;
use crate::orchestration::reconciler::{LineOutcome, Reconciler};
use crate::services::cost::CostAccountant;
use crate::services::encoder::{EncodedTask, TaskEncoder};
use crate::services::inference::client::BatchProvider;

/// Consecutive failed status reads tolerated before the run aborts
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Submits every item as one provider-managed batch job, polls it to a
/// terminal state and reconciles the output file back onto the items.
///
/// Job lifecycle as seen by the poller:
/// `Validating -> InProgress -> Finalizing -> Completed | Failed`.
/// Repeated statuses are expected; moving forward past a state between two
/// reads is accepted; moving backwards aborts the run.
pub struct BatchJobAnalyzer {
    provider: Arc<dyn BatchProvider>,
    encoder: TaskEncoder,
    accountant: CostAccountant,
    observer: Arc<dyn RunObserver>,
    poll_interval: Duration,
    timeout: Duration,
    cancel_on_abort: bool,
}

impl BatchJobAnalyzer {
    pub fn new(
        provider: Arc<dyn BatchProvider>,
        encoder: TaskEncoder,
        accountant: CostAccountant,
        observer: Arc<dyn RunObserver>,
        config: &BatchJobConfig,
    ) -> Self {
        Self {
            provider,
            encoder,
            accountant,
            observer,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(config.timeout_secs),
            cancel_on_abort: config.cancel_on_abort,
        }
    }

    async fn run(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>> {
        let valid = validate_items(items, self.observer.as_ref());

        let mut encoded = Vec::with_capacity(valid.len());
        for (sequence, item) in valid {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            match self.encoder.encode(sequence, &item).await {
                Ok(task) => encoded.push(task),
                Err(e) => self.observer.item_skipped(&e),
            }
        }

        if encoded.is_empty() {
            info!("No valid tasks, skipping batch submission");
            return Ok(Vec::new());
        }

        let job = self.submit(&encoded, cancel).await?;
        let job = self.wait_for_completion(job, cancel).await?;

        if job.status == BatchStatus::Failed {
            return Err(RunError::BatchJobFailed {
                reason: job
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "provider reported failure".to_string()),
                job_id: job.job_id,
            });
        }

        let reconciler = Reconciler::new(encoded.into_iter().map(|e| e.task));
        self.collect_results(&job, reconciler).await
    }

    /// Serialize the task file, upload it and create the job
    async fn submit(
        &self,
        encoded: &[EncodedTask],
        cancel: &CancellationToken,
    ) -> RunResult<BatchJob> {
        let mut file = Vec::new();
        for task in encoded {
            serde_json::to_writer(&mut file, &self.encoder.task_line(task))
                .map_err(RunError::TaskFile)?;
            file.push(b'\n');
        }

        let filename = format!(
            "{}-{}.jsonl",
            self.encoder.variant(),
            Utc::now().format("%Y%m%dT%H%M%S")
        );
        let input_file_id = self
            .provider
            .upload_task_file(&filename, file)
            .await
            .map_err(|source| RunError::BatchSubmit {
                stage: "upload task file",
                source,
            })?;

        // Nothing has been started remotely yet, so there is nothing to cancel
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let job = self
            .provider
            .create_job(&input_file_id)
            .await
            .map_err(|source| RunError::BatchSubmit {
                stage: "create job",
                source,
            })?;

        info!(
            "Submitted batch job {} with {} tasks (input file {})",
            job.job_id,
            encoded.len(),
            input_file_id
        );
        Ok(job)
    }

    /// Poll until the job is terminal, the timeout passes or the run is cancelled
    async fn wait_for_completion(
        &self,
        mut job: BatchJob,
        cancel: &CancellationToken,
    ) -> RunResult<BatchJob> {
        let started = Instant::now();
        let mut poll_errors = 0;

        loop {
            if job.status.is_terminal() {
                return Ok(job);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                self.abandon(&job.job_id).await;
                return Err(RunError::BatchTimeout {
                    job_id: job.job_id,
                    elapsed,
                });
            }

            let wait = self.poll_interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.abandon(&job.job_id).await;
                    return Err(RunError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let next = match self.provider.get_job(&job.job_id).await {
                Ok(next) => {
                    poll_errors = 0;
                    next
                }
                Err(e) => {
                    poll_errors += 1;
                    warn!(
                        "Polling batch job {} failed ({}/{}): {}",
                        job.job_id, poll_errors, MAX_CONSECUTIVE_POLL_ERRORS, e
                    );
                    if poll_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        self.abandon(&job.job_id).await;
                        return Err(RunError::BatchPoll {
                            job_id: job.job_id,
                            source: e,
                        });
                    }
                    continue;
                }
            };

            self.observer
                .batch_status(&next.job_id, next.status, started.elapsed());

            if next.status.rank() < job.status.rank() {
                self.abandon(&job.job_id).await;
                return Err(RunError::InvalidTransition {
                    job_id: job.job_id,
                    from: job.status,
                    to: next.status,
                });
            }
            if next.status != job.status {
                debug!("Batch job {}: {} -> {}", job.job_id, job.status, next.status);
            }
            job = next;
        }
    }

    /// Best-effort remote cancel so an abandoned job does not keep running
    async fn abandon(&self, job_id: &str) {
        if !self.cancel_on_abort {
            warn!("Abandoning batch job {}; it may still run remotely", job_id);
            return;
        }
        match self.provider.cancel_job(job_id).await {
            Ok(()) => info!("Requested cancellation of batch job {}", job_id),
            Err(e) => warn!("Could not cancel batch job {}: {}", job_id, e),
        }
    }

    async fn download(&self, job_id: &str, file_id: Option<&str>) -> RunResult<String> {
        let Some(file_id) = file_id else {
            return Ok(String::new());
        };
        self.provider
            .download_file(file_id)
            .await
            .map_err(|source: ProviderError| RunError::BatchDownload {
                job_id: job_id.to_string(),
                source,
            })
    }

    async fn collect_results(
        &self,
        job: &BatchJob,
        mut reconciler: Reconciler,
    ) -> RunResult<Vec<PostAggregate>> {
        let output = self.download(&job.job_id, job.output_file_id.as_deref()).await?;
        // Per-line errors are diagnostics; losing them leaves those tasks
        // unmatched, which is reported below
        let errors = match self.download(&job.job_id, job.error_file_id.as_deref()).await {
            Ok(errors) => errors,
            Err(e) => {
                warn!("Ignoring batch error file: {}", e);
                String::new()
            }
        };

        let mut aggregator = PostAggregator::new(self.observer.clone());
        let lines = output
            .lines()
            .chain(errors.lines())
            .filter(|line| !line.trim().is_empty());

        for line in lines {
            match reconciler.reconcile_line(line) {
                LineOutcome::Parsed { task, result, usage } => {
                    let kept = aggregator.add(&task.item, result);
                    if kept {
                        self.accountant.record(&usage);
                        self.observer.item_analyzed(&task);
                    } else {
                        self.accountant.charge(&usage);
                    }
                }
                LineOutcome::Failed { error, .. } => self.observer.item_skipped(&error),
                LineOutcome::Dropped { custom_id, reason } => {
                    self.observer.result_dropped(&custom_id, &reason)
                }
            }
        }

        for task in reconciler.into_unmatched() {
            self.observer
                .result_dropped(&task.custom_id, "task missing from job output");
        }

        Ok(aggregator.take_posts())
    }
}

#[async_trait]
impl Analyzer for BatchJobAnalyzer {
    fn strategy(&self) -> Strategy {
        Strategy::Batch
    }

    #[instrument(skip(self, items, cancel), fields(items = items.len(), variant = %self.encoder.variant()))]
    async fn process(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>> {
        self.observer.run_started(self.strategy(), items.len());
        let result = self.run(items, cancel).await;
        match &result {
            Ok(posts) => info!(
                "Batch run finished: {} posts, ${:.6}",
                posts.len(),
                self.accountant.summary().total_cost
            ),
            Err(e) => self.observer.run_aborted(self.strategy(), e),
        }
        result
    }

    fn cost_summary(&self) -> CostSummary {
        self.accountant.summary()
    }
}
