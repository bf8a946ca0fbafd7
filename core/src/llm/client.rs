use crate::context::ContextEntry;
use crate::{ConcordError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use super::adapter::context_to_messages;
use super::TextCompletion;

/// Configuration for `HttpCompletion`; defaults come from environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    pub base_url: String, // e.g., http://localhost:8000/v1
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub system_prompt: String,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("CONCORD_LLM_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://localhost:8000/v1".to_string()),
            model: std::env::var("CONCORD_LLM_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "qwen2.5-0.5b-instruct".to_string()),
            api_key: std::env::var("CONCORD_LLM_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("CONCORD_LLM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            temperature: std::env::var("CONCORD_LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
            max_input_tokens: 2048,
            max_output_tokens: 512,
            system_prompt: "You are a helpful assistant collaborating with other agents."
                .to_string(),
        }
    }
}

/// `TextCompletion` over an OpenAI-compatible Chat Completions endpoint
#[derive(Clone)]
pub struct HttpCompletion {
    http: Client,
    cfg: LlmClientConfig,
}

impl HttpCompletion {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| ConcordError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LlmClientConfig::default())
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.cfg
    }
}

#[async_trait]
impl TextCompletion for HttpCompletion {
    async fn complete(&self, prompt: &str, context: &[ContextEntry]) -> Result<String> {
        let messages = context_to_messages(
            &self.cfg.system_prompt,
            context,
            prompt,
            self.cfg.max_input_tokens,
        );

        let chat_url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!(
            target = "llm_client",
            context_entries = context.len(),
            "POST {} via Chat Completions",
            chat_url
        );

        let mut req = self
            .http
            .post(&chat_url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let body = json!({
            "model": self.cfg.model,
            "messages": messages,
            "max_tokens": self.cfg.max_output_tokens as u32,
            "temperature": self.cfg.temperature,
        });

        let resp = req.json(&body).send().await.map_err(|e| {
            ConcordError::BackendUnavailable(format!("Chat Completions HTTP error: {e}"))
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(target = "llm_client", %status, body = %text, "Chat Completions error");
            return Err(ConcordError::BackendUnavailable(format!(
                "Chat Completions error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp.json().await.map_err(|e| {
            ConcordError::BackendUnavailable(format!("Failed to parse Chat Completions JSON: {e}"))
        })?;
        extract_text_from_chat_completions(&val).ok_or_else(|| {
            ConcordError::BackendUnavailable(
                "Missing choices[0].message.content in chat completions".into(),
            )
        })
    }

    fn name(&self) -> &str {
        "chat.completions"
    }
}

pub(crate) fn extract_text_from_chat_completions(v: &serde_json::Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}
