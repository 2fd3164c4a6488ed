//! LLM API client and types

mod client;
mod types;

pub use client::{CompletionClient, OpenAiClient};
pub use types::{ChatMessage, Completion, CompletionRequest, RequestParams, Role, Usage};
