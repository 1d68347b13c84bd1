use crate::config::LlmConfig;
use crate::memory::Generator;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::chat::ChatMessage;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} - {}", status, body);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        extract_reply(chat_response)
    }
}

fn extract_reply(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("No choices returned from LLM"))
}

#[async_trait::async_trait]
impl Generator for LlmService {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.generate_chat(messages).await
    }
}
