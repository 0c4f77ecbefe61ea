// Library exports for the content enrichment service
//
// Image analysis orchestration: sequential, bounded-concurrency and
// provider batch-job strategies behind one analyzer contract

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use self::core::{
    config::Config,
    errors::{ConfigError, ItemError, ProviderError, RunError},
    types::{
        AnalysisItem, AnalysisResult, BatchJob, BatchStatus, CostSummary, PostAggregate,
        PromptVariant, Strategy,
    },
};

pub use middleware::{CircuitBreaker, CircuitState};

pub use orchestration::{build_analyzer, Analyzer, RunObserver, TracingObserver};

pub use services::{CostAccountant, OpenAiClient, PricingTable, TaskEncoder};

pub use utils::{resolve_image_ref, Metrics};
