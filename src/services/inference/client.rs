// Provider boundary: the traits every strategy talks to, plus the wire shapes
// they exchange (chat-completions requests, batch task lines, batch output lines)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ProviderResult;
use crate::core::types::BatchJob;

/// Endpoint path referenced from batch task lines
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Single synchronous model call
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> ProviderResult<ChatResponse>;
}

/// Provider-managed asynchronous batch jobs
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Upload a newline-delimited task file, returning its file id
    async fn upload_task_file(&self, filename: &str, contents: Vec<u8>) -> ProviderResult<String>;

    async fn create_job(&self, input_file_id: &str) -> ProviderResult<BatchJob>;

    async fn get_job(&self, job_id: &str) -> ProviderResult<BatchJob>;

    async fn download_file(&self, file_id: &str) -> ProviderResult<String>;

    async fn cancel_job(&self, job_id: &str) -> ProviderResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// First image reference in the request, if any
    pub fn image_url(&self) -> Option<&str> {
        self.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|part| match part {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                ContentPart::Text { .. } => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Text of the first choice
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// One line of an uploaded batch task file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

/// One line of a downloaded batch output file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<OutputResponse>,
    #[serde(default)]
    pub error: Option<OutputError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Kept loose so one malformed body fails its own line, not the file
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

fn default_status_code() -> u16 {
    200
}
