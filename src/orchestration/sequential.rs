use async_trait::async_trait;
use std::sync::Arc;
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

/// One call at a time, in input order. Output post order is stable.
pub struct SequentialAnalyzer {
    client: Arc<dyn InferenceClient>,
    encoder: TaskEncoder,
    accountant: CostAccountant,
    observer: Arc<dyn RunObserver>,
}

impl SequentialAnalyzer {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        encoder: TaskEncoder,
        accountant: CostAccountant,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            client,
            encoder,
            accountant,
            observer,
        }
    }

    async fn run(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>> {
        let valid = validate_items(items, self.observer.as_ref());
        let mut aggregator = PostAggregator::new(self.observer.clone());

        for (sequence, item) in valid {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            match analyze_one(self.client.as_ref(), &self.encoder, sequence, &item).await {
                Ok((task, result, usage)) => {
                    let kept = aggregator.add(&task.item, result);
                    if kept {
                        self.accountant.record(&usage);
                        self.observer.item_analyzed(&task);
                    } else {
                        self.accountant.charge(&usage);
                    }
                }
                Err(e) => self.observer.item_skipped(&e),
            }
        }

        Ok(aggregator.take_posts())
    }
}

#[async_trait]
impl Analyzer for SequentialAnalyzer {
    fn strategy(&self) -> Strategy {
        Strategy::Sequential
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
                "Sequential run finished: {} posts, ${:.6}",
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
