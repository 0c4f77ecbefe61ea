pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, ItemError, ItemResult, ProviderError, ProviderResult, RunError, RunResult,
};
pub use types::{
    AnalysisItem, AnalysisResult, AnalysisTask, BatchJob, BatchStatus, CostLedger, CostSummary,
    PostAggregate, PromptVariant, Strategy,
};
