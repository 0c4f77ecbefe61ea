// Shared contract for the three execution strategies

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::errors::{ItemError, ItemResult, RunResult};
use crate::core::types::{
    AnalysisItem, AnalysisResult, AnalysisTask, CostSummary, PostAggregate, PromptVariant,
    Strategy,
};
use crate::orchestration::batch_job::BatchJobAnalyzer;
use crate::orchestration::concurrent::ConcurrentAnalyzer;
use crate::orchestration::observer::RunObserver;
use crate::orchestration::reconciler::parse_chat_response;
use crate::orchestration::sequential::SequentialAnalyzer;
use crate::services::cost::{CostAccountant, PricingTable};
use crate::services::encoder::TaskEncoder;
use crate::services::inference::client::{BatchProvider, InferenceClient, TokenUsage};

/// Turns a list of items into per-post aggregates.
///
/// Item-level failures are reported to the run's observer and left out of
/// the output; only abort-class failures surface as `Err`.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn process(
        &self,
        items: Vec<AnalysisItem>,
        cancel: &CancellationToken,
    ) -> RunResult<Vec<PostAggregate>>;

    fn cost_summary(&self) -> CostSummary;
}

/// Build a fresh analyzer (and therefore a fresh ledger) for one run
pub fn build_analyzer<P>(
    strategy: Strategy,
    variant: PromptVariant,
    config: &Config,
    provider: Arc<P>,
    observer: Arc<dyn RunObserver>,
) -> Box<dyn Analyzer>
where
    P: InferenceClient + BatchProvider + 'static,
{
    let encoder = TaskEncoder::from_config(config, variant);
    let accountant = CostAccountant::new(PricingTable::for_strategy(strategy, &config.pricing));

    match strategy {
        Strategy::Sequential => Box::new(SequentialAnalyzer::new(
            provider,
            encoder,
            accountant,
            observer,
        )),
        Strategy::Concurrent => Box::new(ConcurrentAnalyzer::new(
            provider,
            encoder,
            accountant,
            observer,
            config.concurrency.concurrency,
            config.inter_batch_delay(),
        )),
        Strategy::Batch => Box::new(BatchJobAnalyzer::new(
            provider,
            encoder,
            accountant,
            observer,
            &config.batch_job,
        )),
    }
}

/// Keep items that carry both mandatory fields, paired with their position
/// in the input (the run-scoped sequence index).
pub fn validate_items(
    items: Vec<AnalysisItem>,
    observer: &dyn RunObserver,
) -> Vec<(usize, AnalysisItem)> {
    items
        .into_iter()
        .enumerate()
        .filter(|(index, item)| {
            let missing = if item.post_id.trim().is_empty() {
                Some("post_id")
            } else if item.image_path.trim().is_empty() {
                Some("image_path")
            } else {
                None
            };
            match missing {
                Some(field) => {
                    observer.item_skipped(&ItemError::Invalid {
                        index: *index,
                        field,
                    });
                    false
                }
                None => true,
            }
        })
        .collect()
}

/// One synchronous analysis: encode, call, parse
pub async fn analyze_one(
    client: &dyn InferenceClient,
    encoder: &TaskEncoder,
    sequence: usize,
    item: &AnalysisItem,
) -> ItemResult<(AnalysisTask, AnalysisResult, TokenUsage)> {
    let encoded = encoder.encode(sequence, item).await?;
    let response = client
        .complete(&encoded.request)
        .await
        .map_err(|source| ItemError::ProviderCall {
            custom_id: encoded.task.custom_id.clone(),
            source,
        })?;
    let (result, usage) =
        parse_chat_response(&encoded.task.custom_id, encoded.task.variant, &response)?;
    Ok((encoded.task, result, usage))
}
