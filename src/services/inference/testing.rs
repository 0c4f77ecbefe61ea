// Scripted provider double used by the analyzer tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::core::errors::{ProviderError, ProviderResult};
use crate::core::types::{BatchJob, BatchStatus, RequestCounts};
use crate::services::inference::client::{
    BatchProvider, ChatRequest, ChatResponse, Choice, InferenceClient, ResponseMessage, TokenUsage,
};

pub(crate) const JOB_ID: &str = "batch_test";
pub(crate) const OUTPUT_FILE_ID: &str = "file_out";
pub(crate) const ERROR_FILE_ID: &str = "file_err";

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Reply { content: String, usage: TokenUsage },
    Fail(u16),
}

/// Answers chat calls by image URL and walks a scripted batch lifecycle.
pub(crate) struct ScriptedProvider {
    replies: Mutex<HashMap<String, Outcome>>,
    latency: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,

    statuses: Mutex<VecDeque<BatchStatus>>,
    poll_failures: AtomicUsize,
    fail_upload: bool,
    fail_error_download: bool,
    output: Mutex<Option<String>>,
    errors: Mutex<Option<String>>,
    uploads: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            statuses: Mutex::new(VecDeque::new()),
            poll_failures: AtomicUsize::new(0),
            fail_upload: false,
            fail_error_download: false,
            output: Mutex::new(None),
            errors: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// The job advertises an error file whose download fails
    pub fn failing_error_download(mut self) -> Self {
        self.fail_error_download = true;
        self
    }

    pub fn reply(self, image_url: &str, content: impl Into<String>) -> Self {
        self.replies.lock().insert(
            image_url.to_string(),
            Outcome::Reply {
                content: content.into(),
                usage: default_usage(),
            },
        );
        self
    }

    pub fn fail(self, image_url: &str, status: u16) -> Self {
        self.replies
            .lock()
            .insert(image_url.to_string(), Outcome::Fail(status));
        self
    }

    /// Status sequence returned by successive polls; the last entry repeats
    pub fn statuses(self, statuses: &[BatchStatus]) -> Self {
        *self.statuses.lock() = statuses.iter().copied().collect();
        self
    }

    /// Number of polls that fail with a 503 before the script resumes
    pub fn poll_failures(self, count: usize) -> Self {
        self.poll_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn output(self, lines: &[String]) -> Self {
        *self.output.lock() = Some(lines.join("\n"));
        self
    }

    pub fn error_output(self, lines: &[String]) -> Self {
        *self.errors.lock() = Some(lines.join("\n"));
        self
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn job(&self, status: BatchStatus) -> BatchJob {
        let completed = status == BatchStatus::Completed;
        BatchJob {
            job_id: JOB_ID.to_string(),
            status,
            input_file_id: "file_in".to_string(),
            output_file_id: (completed && self.output.lock().is_some())
                .then(|| OUTPUT_FILE_ID.to_string()),
            error_file_id: (completed && (self.fail_error_download || self.errors.lock().is_some()))
                .then(|| ERROR_FILE_ID.to_string()),
            created_at: Utc::now(),
            counts: RequestCounts::default(),
            failure_reason: (status == BatchStatus::Failed)
                .then(|| "provider status `failed`".to_string()),
        }
    }
}

#[async_trait]
impl InferenceClient for ScriptedProvider {
    async fn complete(&self, request: &ChatRequest) -> ProviderResult<ChatResponse> {
        let url = request.image_url().unwrap_or_default().to_string();
        self.calls.lock().push((url.clone(), Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self.replies.lock().get(&url).cloned();
        match outcome {
            Some(Outcome::Reply { content, usage }) => Ok(chat_response(&content, usage)),
            Some(Outcome::Fail(status)) => Err(ProviderError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            None => Err(ProviderError::InvalidResponse(format!("no script for {}", url))),
        }
    }
}

#[async_trait]
impl BatchProvider for ScriptedProvider {
    async fn upload_task_file(&self, _filename: &str, contents: Vec<u8>) -> ProviderResult<String> {
        if self.fail_upload {
            return Err(ProviderError::Status {
                status: 400,
                body: "invalid file".to_string(),
            });
        }
        self.uploads
            .lock()
            .push(String::from_utf8_lossy(&contents).into_owned());
        Ok("file_in".to_string())
    }

    async fn create_job(&self, _input_file_id: &str) -> ProviderResult<BatchJob> {
        Ok(self.job(BatchStatus::Validating))
    }

    async fn get_job(&self, _job_id: &str) -> ProviderResult<BatchJob> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.poll_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.poll_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        let status = {
            let mut statuses = self.statuses.lock();
            if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().copied()
            }
        };
        Ok(self.job(status.unwrap_or(BatchStatus::InProgress)))
    }

    async fn download_file(&self, file_id: &str) -> ProviderResult<String> {
        let contents = match file_id {
            OUTPUT_FILE_ID => self.output.lock().clone(),
            ERROR_FILE_ID if self.fail_error_download => {
                return Err(ProviderError::Status {
                    status: 500,
                    body: "download interrupted".to_string(),
                })
            }
            ERROR_FILE_ID => self.errors.lock().clone(),
            _ => None,
        };
        contents.ok_or(ProviderError::Status {
            status: 404,
            body: format!("no file {}", file_id),
        })
    }

    async fn cancel_job(&self, job_id: &str) -> ProviderResult<()> {
        self.cancelled.lock().push(job_id.to_string());
        Ok(())
    }
}

pub(crate) fn default_usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 1000,
        completion_tokens: 200,
        total_tokens: 1200,
    }
}

pub(crate) fn chat_response(content: &str, usage: TokenUsage) -> ChatResponse {
    ChatResponse {
        choices: vec![Choice {
            message: ResponseMessage {
                content: Some(content.to_string()),
            },
        }],
        usage: Some(usage),
    }
}

pub(crate) fn fashion_json(aesthetic: &str) -> String {
    serde_json::json!({
        "aesthetic": aesthetic,
        "colors": ["black", "cream"],
        "season": "autumn",
        "occasion": "casual",
        "additional": ["oversized"],
    })
    .to_string()
}

pub(crate) fn hook_json(is_hook: bool, confidence: f64) -> String {
    let theme = is_hook.then_some("back to school outfits");
    serde_json::json!({
        "is_hook_slide": is_hook,
        "confidence": confidence,
        "theme": theme,
        "text": null,
        "target_vibe": null,
    })
    .to_string()
}

/// One successful batch output line carrying `content`
pub(crate) fn output_line(custom_id: &str, content: &str) -> String {
    serde_json::json!({
        "custom_id": custom_id,
        "response": {
            "status_code": 200,
            "body": chat_response(content, default_usage()),
        },
    })
    .to_string()
}

pub(crate) fn error_line(custom_id: &str, message: &str) -> String {
    serde_json::json!({
        "custom_id": custom_id,
        "error": { "code": "invalid_image", "message": message },
    })
    .to_string()
}
