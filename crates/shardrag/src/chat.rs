//! Chat-completion client.
//!
//! A thin pass-through to an OpenAI-compatible `chat/completions` endpoint.
//! Retrieved chunks are placed in the user message as context; nothing else
//! about the retrieval protocol leaks into this module.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ChatConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// Build the prompt for `query` with the retrieved `chunks` as context.
pub fn build_messages<S: AsRef<str>>(query: &str, chunks: &[S]) -> Vec<Message> {
    let context = chunks
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    vec![
        Message::system(
            "You are a helpful assistant. Answer using the provided context when it is relevant.",
        ),
        Message::user(format!("Context:\n{}\n\nQuestion: {}", context, query)),
    ]
}

pub struct ChatClient {
    config: ChatConfig,
    api_key: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Reads the API key from the environment variable named in the config.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ChatConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// Send the messages and return the first choice's content.
    pub async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };
        debug!(model = %self.config.model, messages = messages.len(), "chat completion");

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}
