// Error taxonomy for the analysis orchestrator
//
// Two classes matter to callers:
// - ItemError: a single image is skipped, the run continues
// - RunError: the whole run aborts and nothing is returned

use std::time::Duration;
use thiserror::Error;

use crate::core::types::BatchStatus;

/// Transport-level failures talking to the inference provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Circuit breaker is open, provider calls are failing fast")]
    CircuitOpen,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether another attempt at the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::CircuitOpen | ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// Per-item failures. The item is skipped and the run continues.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Item {index} is missing required field `{field}`")]
    Invalid { index: usize, field: &'static str },

    #[error("Image {path} is unreadable: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Response for {custom_id} did not parse: {reason}")]
    ResponseParse {
        custom_id: String,
        reason: String,
        /// Raw model output, kept for diagnosis
        raw: String,
    },

    #[error("Provider call failed for {custom_id}: {source}")]
    ProviderCall {
        custom_id: String,
        #[source]
        source: ProviderError,
    },
}

impl ItemError {
    /// Stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Invalid { .. } => "item_invalid",
            ItemError::Unreadable { .. } => "item_unreadable",
            ItemError::ResponseParse { .. } => "response_parse",
            ItemError::ProviderCall { .. } => "provider_call",
        }
    }
}

/// Abort-class failures. The run returns no aggregates.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Batch submission failed while trying to {stage}: {source}")]
    BatchSubmit {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Batch job {job_id} failed: {reason}")]
    BatchJobFailed { job_id: String, reason: String },

    #[error("Batch job {job_id} still pending after {elapsed:?}")]
    BatchTimeout { job_id: String, elapsed: Duration },

    #[error("Polling batch job {job_id} failed: {source}")]
    BatchPoll {
        job_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Downloading output of batch job {job_id} failed: {source}")]
    BatchDownload {
        job_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Batch job {job_id} moved backwards from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Failed to encode batch task file: {0}")]
    TaskFile(#[source] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Analysis task panicked or was aborted: {0}")]
    TaskJoinFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key configured (set OPENAI_API_KEY environment variable)")]
    NoApiKey,

    #[error("Concurrency must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Invalid batch job config: {0}")]
    InvalidBatchJobConfig(String),

    #[error("Invalid pricing config: {0}")]
    InvalidPricing(String),

    #[error("Invalid provider config: {0}")]
    InvalidProviderConfig(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
pub type ItemResult<T> = Result<T, ItemError>;
pub type RunResult<T> = Result<T, RunError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
