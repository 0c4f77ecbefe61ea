use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::errors::{RunError, RunResult};
use crate::core::types::{AnalysisItem, CostSummary, PostAggregate, Strategy};
use crate::orchestration::aggregator::PostAggregator;
use crate::orchestration::analyzer::{analyze_one, validate_items, Analyzer};
use crate::orchestration::observer::RunObserver;
use crate::services::cost::CostAccountant;
use crate::services::encoder::TaskEncoder;
use crate::services::inference::client::InferenceClient;

/// Issues up to `concurrency` calls at once, in waves.
///
/// Each wave runs to completion (success or failure for every member)
/// before the next one starts, so N valid items take exactly
/// `ceil(N / concurrency)` waves. Completion order inside a wave is not
/// deterministic; neither is post order in the output.
pub struct ConcurrentAnalyzer {
    client: Arc<dyn InferenceClient>,
    encoder: Arc<TaskEncoder>,
    accountant: Arc<CostAccountant>,
    observer: Arc<dyn RunObserver>,
    concurrency: usize,
    inter_batch_delay: Duration,
}

impl ConcurrentAnalyzer {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        encoder: TaskEncoder,
        accountant: CostAccountant,
        observer: Arc<dyn RunObserver>,
        concurrency: usize,
        inter_batch_delay: Duration,
    ) -> Self {
        Self {
            client,
            encoder: Arc::new(encoder),
            accountant: Arc::new(accountant),
            observer,
            concurrency: concurrency.max(1),
            inter_batch_delay,
        }
    }

    async fn run(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>> {
        let valid = validate_items(items, self.observer.as_ref());
        let aggregator = Arc::new(Mutex::new(PostAggregator::new(self.observer.clone())));
        let waves: Vec<&[(usize, AnalysisItem)]> = valid.chunks(self.concurrency).collect();

        for (wave, chunk) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            self.observer.wave_started(wave, chunk.len());

            let handles: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|(sequence, item)| {
                    let client = self.client.clone();
                    let encoder = self.encoder.clone();
                    let accountant = self.accountant.clone();
                    let observer = self.observer.clone();
                    let aggregator = aggregator.clone();

                    tokio::spawn(async move {
                        match analyze_one(client.as_ref(), &encoder, sequence, &item).await {
                            Ok((task, result, usage)) => {
                                let kept = aggregator.lock().add(&task.item, result);
                                if kept {
                                    accountant.record(&usage);
                                    observer.item_analyzed(&task);
                                } else {
                                    accountant.charge(&usage);
                                }
                            }
                            Err(e) => observer.item_skipped(&e),
                        }
                    })
                })
                .collect();

            // Wait for every member; a failed item never cancels its siblings
            for joined in join_all(handles).await {
                joined.map_err(|e| RunError::TaskJoinFailed(e.to_string()))?;
            }

            let is_last = wave + 1 == waves.len();
            if !is_last && !self.inter_batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RunError::Cancelled),
                    _ = tokio::time::sleep(self.inter_batch_delay) => {}
                }
            }
        }

        let posts = aggregator.lock().take_posts();
        Ok(posts)
    }
}

#[async_trait]
impl Analyzer for ConcurrentAnalyzer {
    fn strategy(&self) -> Strategy {
        Strategy::Concurrent
    }

    #[instrument(skip(self, items, cancel), fields(items = items.len(), concurrency = self.concurrency))]
    async fn process(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>> {
        self.observer.run_started(self.strategy(), items.len());
        let result = self.run(items, cancel).await;
        match &result {
            Ok(posts) => info!(
                "Concurrent run finished: {} posts, ${:.6}",
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
