//! LLM chat completion and text embedding clients.
//!
//! Both providers used for extraction speak the OpenAI chat-completions dialect, so a
//! single client type serves them; [`ProviderPool`] alternates between configured
//! providers and falls back to the other one when a call fails.

pub mod chat;
pub mod embeddings;
pub mod json;

pub use chat::{ChatModel, CompletionOptions, Message, OpenAiCompatClient, ProviderPool};
pub use embeddings::{Embedder, JinaEmbedder};
pub use json::parse_json_response;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    /// Configuration error (missing API key, no providers)
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failed or timed out
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response or an empty completion
    #[error("API error: {0}")]
    Api(String),

    /// Response body was not the expected JSON
    #[error("parse error: {0}")]
    Parse(String),
}
