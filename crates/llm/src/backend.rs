//! OpenAI-compatible HTTP backend
//!
//! One `reqwest` client serving the chat-completions, embeddings and
//! moderation endpoints. Transient failures retry with exponential
//! backoff up to a bounded attempt count; every call honors the
//! configured request timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use recipe_chat_core::{
    ChatMessage, ChatRole, EmbeddingProvider, LlmOptions, LlmProvider, ModerationProvider,
    ModerationReport, Result,
};

use crate::LlmError;

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Default chat model; per-call options may override.
    pub model: String,
    pub embedding_model: String,
    pub moderation_model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// Maximum attempts for transient failures.
    pub max_retries: u32,
    /// Initial backoff, doubled each retry.
    pub initial_backoff: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            moderation_model: "omni-moderation-latest".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl OpenAiConfig {
    /// Read endpoint/key/model knobs from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("OPENAI_API_BASE").unwrap_or(defaults.endpoint),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("GENERATION_MODEL").unwrap_or(defaults.model),
            embedding_model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            moderation_model: std::env::var("MODERATION_MODEL")
                .unwrap_or(defaults.moderation_model),
            ..defaults
        }
    }
}

/// OpenAI-compatible provider adapter.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: std::collections::HashMap<String, bool>,
    #[serde(default)]
    category_scores: std::collections::HashMap<String, f32>,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// POST with bounded retries and exponential backoff. Client errors
    /// (4xx) are terminal; 429 and 5xx retry.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, LlmError> {
        let url = self.api_url(path);
        let mut backoff = self.config.initial_backoff;
        let mut last_error = LlmError::Request("no attempt made".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(key) = &self.config.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| LlmError::Response(format!("decode: {}", e)));
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let text = response.text().await.unwrap_or_default();
                    last_error =
                        LlmError::Request(format!("{} {}: {}", url, status, truncate(&text, 200)));
                    if !retryable {
                        return Err(last_error);
                    }
                    tracing::warn!(attempt, %status, "retryable provider error");
                }
                Err(e) => {
                    last_error = LlmError::Request(format!("{}: {}", url, e));
                    tracing::warn!(attempt, error = %e, "provider request failed");
                }
            }
        }

        Err(last_error)
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: &LlmOptions,
        json_object: bool,
    ) -> std::result::Result<String, LlmError> {
        let mut body = json!({
            "model": opts.model.clone().unwrap_or_else(|| self.config.model.clone()),
            "messages": Self::wire_messages(messages),
            "temperature": opts.temperature.unwrap_or(self.config.temperature),
        });
        if json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let value = self.post_with_retry("/chat/completions", &body).await?;
        let response: ChatCompletionResponse = serde_json::from_value(value)
            .map_err(|e| LlmError::Response(format!("chat decode: {}", e)))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("empty completion".to_string()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl LlmProvider for OpenAiBackend {
    async fn complete_text(&self, messages: &[ChatMessage], opts: &LlmOptions) -> Result<String> {
        Ok(self.chat(messages, opts, false).await?)
    }

    async fn complete_with_schema(
        &self,
        schema: &serde_json::Value,
        messages: &[ChatMessage],
        opts: &LlmOptions,
    ) -> Result<serde_json::Value> {
        // Prepend the schema as an instruction and force a JSON object
        // response; compatible endpoints without native structured output
        // still produce parseable JSON this way.
        let mut framed = Vec::with_capacity(messages.len() + 1);
        framed.push(ChatMessage::system(format!(
            "Respond with a single JSON object matching this schema, no prose:\n{}",
            schema
        )));
        framed.extend_from_slice(messages);

        let content = self.chat(&framed, opts, true).await?;
        let value: serde_json::Value = serde_json::from_str(content.trim())
            .map_err(|e| LlmError::Response(format!("schema decode: {}", e)))?;
        Ok(value)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiBackend {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::Response("empty embedding".to_string()).into())
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.config.embedding_model,
            "input": texts,
        });
        let value = self.post_with_retry("/embeddings", &body).await?;
        let response: EmbeddingResponse = serde_json::from_value(value)
            .map_err(|e| LlmError::Response(format!("embedding decode: {}", e)))?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl ModerationProvider for OpenAiBackend {
    async fn moderate(&self, text: &str) -> Result<ModerationReport> {
        let body = json!({
            "model": self.config.moderation_model,
            "input": text,
        });
        let value = self.post_with_retry("/moderations", &body).await?;
        let response: ModerationResponse = serde_json::from_value(value)
            .map_err(|e| LlmError::Response(format!("moderation decode: {}", e)))?;
        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Response("empty moderation result".to_string()))?;
        Ok(ModerationReport {
            flagged: result.flagged,
            categories: result.categories,
            category_scores: result.category_scores,
        })
    }
}
