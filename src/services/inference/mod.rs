pub mod client;
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    BatchProvider, ChatMessage, ChatRequest, ChatResponse, ContentPart, InferenceClient,
    OutputLine, TaskLine, TokenUsage,
};
pub use openai::OpenAiClient;
