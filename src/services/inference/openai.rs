use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ProviderError, ProviderResult};
use crate::core::types::{BatchJob, BatchStatus, RequestCounts};
use crate::middleware::circuit_breaker::CircuitBreaker;
use crate::services::inference::client::{
    BatchProvider, ChatRequest, ChatResponse, InferenceClient, CHAT_COMPLETIONS_PATH,
};
use crate::utils::Metrics;

/// Wait applied to 429/503 before retrying
const OVERLOAD_BACKOFF: Duration = Duration::from_secs(10);
const BATCH_COMPLETION_WINDOW: &str = "24h";

/// OpenAI-compatible client for chat completions, file uploads and batch jobs.
///
/// Transport failures (timeouts, 429, 5xx) are retried here with backoff; the
/// orchestrator itself never re-submits an item.
pub struct OpenAiClient {
    config: Arc<Config>,
    api_key: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

/// Batch object as returned by the provider
#[derive(Debug, Deserialize)]
struct ProviderBatch {
    id: String,
    status: String,
    #[serde(default)]
    input_file_id: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    request_counts: Option<RequestCounts>,
    #[serde(default)]
    errors: Option<ProviderBatchErrors>,
}

#[derive(Debug, Deserialize)]
struct ProviderBatchErrors {
    #[serde(default)]
    data: Vec<ProviderBatchError>,
}

#[derive(Debug, Deserialize)]
struct ProviderBatchError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

impl OpenAiClient {
    pub fn new(config: Arc<Config>, metrics: Option<Metrics>) -> Result<Self> {
        let api_key = config.api_key()?.to_string();

        let http_client = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let circuit_breaker = CircuitBreaker::new(&config.breaker, metrics.clone());

        Ok(Self {
            config,
            api_key,
            http_client,
            circuit_breaker,
            metrics,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.provider.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per attempt because multipart bodies cannot be
    /// replayed.
    async fn send_with_retries<F>(
        &self,
        operation: &str,
        build: F,
    ) -> ProviderResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        self.circuit_breaker.check()?;

        let max_retries = self.config.provider.max_retries;
        let mut attempt = 0;

        loop {
            let result = match build().bearer_auth(&self.api_key).send().await {
                Ok(response) if response.status().is_success() => Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    Err(ProviderError::Status { status, body })
                }
                Err(e) => Err(ProviderError::Http(e)),
            };

            match result {
                Ok(response) => {
                    self.circuit_breaker.record_success();
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = retry_delay(&e, attempt);
                    debug!(
                        "{} failed: {}. Retrying in {:?} ({}/{})",
                        operation,
                        e,
                        delay,
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    // 4xx means the provider is up and rejected this request
                    if e.is_retryable() {
                        self.circuit_breaker.record_failure();
                    }
                    warn!("{} failed after {} attempts: {}", operation, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_batch<F>(&self, operation: &str, build: F) -> ProviderResult<BatchJob>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.send_with_retries(operation, build).await?;
        let batch: ProviderBatch = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("batch object: {}", e)))?;
        batch.into_job()
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> ProviderResult<ChatResponse> {
        let url = self.endpoint("chat/completions");
        let start = Instant::now();

        let result = async {
            let response = self
                .send_with_retries("chat completion", || self.http_client.post(&url).json(request))
                .await?;
            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| ProviderError::InvalidResponse(format!("chat completion: {}", e)))
        }
        .await;

        if let Some(ref m) = self.metrics {
            match &result {
                Ok(response) => {
                    let usage = response.usage.unwrap_or_default();
                    m.record_inference_call(
                        true,
                        start.elapsed(),
                        usage.prompt_tokens,
                        usage.completion_tokens,
                    );
                }
                Err(_) => m.record_inference_call(false, start.elapsed(), 0, 0),
            }
        }

        result
    }
}

#[async_trait]
impl BatchProvider for OpenAiClient {
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    async fn upload_task_file(&self, filename: &str, contents: Vec<u8>) -> ProviderResult<String> {
        let url = self.endpoint("files");
        let response = self
            .send_with_retries("task file upload", || {
                let part = Part::bytes(contents.clone()).file_name(filename.to_string());
                let form = Form::new().text("purpose", "batch").part("file", part);
                self.http_client.post(&url).multipart(form)
            })
            .await?;

        let uploaded: UploadedFile = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("file upload: {}", e)))?;
        debug!("Uploaded task file {} as {}", filename, uploaded.id);
        Ok(uploaded.id)
    }

    async fn create_job(&self, input_file_id: &str) -> ProviderResult<BatchJob> {
        let url = self.endpoint("batches");
        let body = serde_json::json!({
            "input_file_id": input_file_id,
            "endpoint": CHAT_COMPLETIONS_PATH,
            "completion_window": BATCH_COMPLETION_WINDOW,
        });
        self.fetch_batch("batch creation", || self.http_client.post(&url).json(&body))
            .await
    }

    async fn get_job(&self, job_id: &str) -> ProviderResult<BatchJob> {
        let url = self.endpoint(&format!("batches/{}", job_id));
        self.fetch_batch("batch status", || self.http_client.get(&url)).await
    }

    async fn download_file(&self, file_id: &str) -> ProviderResult<String> {
        let url = self.endpoint(&format!("files/{}/content", file_id));
        let response = self
            .send_with_retries("file download", || self.http_client.get(&url))
            .await?;
        Ok(response.text().await?)
    }

    async fn cancel_job(&self, job_id: &str) -> ProviderResult<()> {
        let url = self.endpoint(&format!("batches/{}/cancel", job_id));
        self.send_with_retries("batch cancel", || self.http_client.post(&url))
            .await?;
        Ok(())
    }
}

impl ProviderBatch {
    fn into_job(self) -> ProviderResult<BatchJob> {
        let status = map_status(&self.status).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("unknown batch status `{}`", self.status))
        })?;

        let failure_reason = if status == BatchStatus::Failed {
            let messages: Vec<String> = self
                .errors
                .map(|e| e.data)
                .unwrap_or_default()
                .into_iter()
                .map(|e| match e.code {
                    Some(code) => format!("{}: {}", code, e.message),
                    None => e.message,
                })
                .collect();
            Some(if messages.is_empty() {
                format!("provider status `{}`", self.status)
            } else {
                format!("provider status `{}` ({})", self.status, messages.join("; "))
            })
        } else {
            None
        };

        Ok(BatchJob {
            job_id: self.id,
            status,
            input_file_id: self.input_file_id,
            output_file_id: self.output_file_id,
            error_file_id: self.error_file_id,
            created_at: DateTime::<Utc>::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now),
            counts: self.request_counts.unwrap_or_default(),
            failure_reason,
        })
    }
}

/// Provider status strings onto the client-side lifecycle.
/// Expired and cancelled jobs are terminal failures from our point of view.
pub fn map_status(raw: &str) -> Option<BatchStatus> {
    match raw {
        "validating" => Some(BatchStatus::Validating),
        "in_progress" => Some(BatchStatus::InProgress),
        "finalizing" => Some(BatchStatus::Finalizing),
        "completed" => Some(BatchStatus::Completed),
        "failed" | "expired" | "cancelling" | "cancelled" => Some(BatchStatus::Failed),
        _ => None,
    }
}

fn retry_delay(error: &ProviderError, attempt: u32) -> Duration {
    match error {
        ProviderError::Status { status: 429 | 503, .. } => OVERLOAD_BACKOFF,
        _ => {
            // Exponential backoff with jitter
            let base_ms = 2_u64.pow(attempt.min(6)) * 1000;
            let jitter = rand::random::<u64>() % 1000;
            Duration::from_millis(base_ms + jitter)
        }
    }
}
