pub mod aggregator;
pub mod analyzer;
pub mod batch_job;
pub mod concurrent;
pub mod observer;
pub mod reconciler;
pub mod sequential;

pub use aggregator::PostAggregator;
pub use analyzer::{build_analyzer, Analyzer};
pub use batch_job::BatchJobAnalyzer;
pub use concurrent::ConcurrentAnalyzer;
pub use observer::{RunObserver, TracingObserver};
pub use reconciler::{LineOutcome, Reconciler};
pub use sequential::SequentialAnalyzer;
