//! Generative-text backends
//!
//! This module provides:
//! - `TextCompletion`, the seam handlers use to produce text
//! - `HttpCompletion` + `LlmClientConfig` for OpenAI-compatible backends
//! - `EchoCompletion`, an offline backend for demos and tests
//! - prompt assembly helpers in `adapter`

pub mod adapter;
mod client;

pub use client::{HttpCompletion, LlmClientConfig};

use crate::context::ContextEntry;
use crate::Result;
use async_trait::async_trait;

/// Produces text for a prompt given ranked context.
///
/// Implementations fail with `BackendUnavailable` when the backend cannot answer.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str, context: &[ContextEntry]) -> Result<String>;

    fn name(&self) -> &str {
        "completion"
    }
}

/// Deterministic offline backend: echoes the prompt and reports how much context it saw
#[derive(Debug, Clone, Default)]
pub struct EchoCompletion {
    prefix: String,
}

impl EchoCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl TextCompletion for EchoCompletion {
    async fn complete(&self, prompt: &str, context: &[ContextEntry]) -> Result<String> {
        let mut out = String::new();
        if !self.prefix.is_empty() {
            out.push_str(&self.prefix);
            out.push(' ');
        }
        out.push_str(prompt);
        if !context.is_empty() {
            out.push_str(&format!(" (with {} context entries)", context.len()));
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "echo"
    }
}
