//! OpenAI-compatible chat completions client

use super::{GenerationError, TextGenerator};
use crate::config::EnrichmentConfig;
use crate::error::{PipelineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Text generator backed by a chat completions endpoint
pub struct ChatCompletionsGenerator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl ChatCompletionsGenerator {
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Request(format!("JSON parse error: {}", e)))?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}
