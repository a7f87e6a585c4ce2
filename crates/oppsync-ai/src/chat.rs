use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{AiError, Result};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 5000,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short provider label used in logs.
    fn name(&self) -> &str;

    /// Returns the trimmed text of the first choice.
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChoiceRaw>,
}

#[derive(Deserialize)]
struct ChoiceRaw {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    http_client: Client,
    name: String,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn groq(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::new("groq", api_key, GROQ_BASE_URL, model, timeout)
    }

    pub fn cerebras(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::new("cerebras", api_key, CEREBRAS_BASE_URL, model, timeout)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.name, error = %e, "chat request failed");
                AiError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = %status, error = %error_text, "chat API error");
            return Err(AiError::Api(format!("{} returned {}: {}", self.name, status, error_text)));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AiError::Api(format!("{} returned no content", self.name)))?;

        debug!(
            provider = %self.name,
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            "chat completion"
        );
        Ok(content)
    }
}

/// Round-robin over providers. Each call starts at the next provider in turn; when it
/// fails, the following provider gets exactly one attempt.
pub struct ProviderPool {
    providers: Vec<Box<dyn ChatModel>>,
    next: AtomicUsize,
}

impl ProviderPool {
    pub fn new(providers: Vec<Box<dyn ChatModel>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(AiError::Config(
                "no LLM providers configured (set GROQ_API_KEY or CEREBRAS_API_KEY)".into(),
            ));
        }
        info!(
            providers = %providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "),
            "LLM providers ready"
        );
        Ok(Self {
            providers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.providers.len()
    }
}

#[async_trait]
impl ChatModel for ProviderPool {
    fn name(&self) -> &str {
        "pool"
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        let primary = &self.providers[self.next_index()];
        let err = match primary.complete(messages, options).await {
            Ok(text) => return Ok(text),
            Err(err) => err,
        };
        error!(provider = primary.name(), error = %err, "LLM call failed");

        if self.providers.len() < 2 {
            return Err(err);
        }
        let fallback = &self.providers[self.next_index()];
        info!(provider = fallback.name(), "falling back to next provider");
        fallback.complete(messages, options).await.map_err(|fallback_err| {
            error!(provider = fallback.name(), error = %fallback_err, "fallback LLM call failed");
            fallback_err
        })
    }
}
