//! Built-in capabilities backed by a `TextCompletion` backend.
//!
//! `chat`, `translate` and `analyze` share one handler type: each builds a prompt from
//! its payload, attaches ranked context from the receiving agent's store, calls the
//! backend and records the turn as CONVERSATION entries.

use crate::context::{ContextPriority, EntrySpec, RankRequest};
use crate::dispatcher::{CapabilityHandler, CapabilityRequest};
use crate::envelope::keys;
use crate::llm::TextCompletion;
use crate::{ConcordError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTask {
    /// Payload: a string, or `{"message": .., "use_context": bool}`
    Chat,
    /// Payload: `{"text": .., "target_language": ..}`
    Translate,
    /// Payload: `{"text": .., "instruction": ..}`
    Analyze,
}

impl CompletionTask {
    pub fn task_name(&self) -> &'static str {
        match self {
            CompletionTask::Chat => "chat",
            CompletionTask::Translate => "translate",
            CompletionTask::Analyze => "analyze",
        }
    }
}

/// What to do when the backend fails
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DegradePolicy {
    /// Fail the request with the backend error
    #[default]
    Propagate,
    /// Answer with a fixed string instead
    Fallback(String),
}

pub struct CompletionHandler {
    task: CompletionTask,
    backend: Arc<dyn TextCompletion>,
    degrade: DegradePolicy,
}

/// A parsed payload: the prompt sent to the backend, the text recorded as the user
/// turn and whether to consult context
struct Turn {
    prompt: String,
    recorded: String,
    use_context: bool,
}

impl CompletionHandler {
    pub fn new(task: CompletionTask, backend: Arc<dyn TextCompletion>) -> Self {
        Self {
            task,
            backend,
            degrade: DegradePolicy::Propagate,
        }
    }

    pub fn with_degrade(mut self, degrade: DegradePolicy) -> Self {
        self.degrade = degrade;
        self
    }

    pub fn task(&self) -> CompletionTask {
        self.task
    }

    fn parse(&self, payload: &Value) -> Result<Turn> {
        match self.task {
            CompletionTask::Chat => {
                let (message, use_context) = match payload {
                    Value::String(s) => (s.clone(), true),
                    Value::Object(_) => (
                        required_str(payload, keys::MESSAGE)?.to_string(),
                        payload
                            .get(keys::USE_CONTEXT)
                            .and_then(Value::as_bool)
                            .unwrap_or(true),
                    ),
                    other => (other.to_string(), true),
                };
                Ok(Turn {
                    prompt: message.clone(),
                    recorded: message,
                    use_context,
                })
            }
            CompletionTask::Translate => {
                let text = required_str(payload, keys::TEXT)?;
                let lang = required_str(payload, keys::TARGET_LANGUAGE)?;
                Ok(Turn {
                    prompt: format!("Translate the following text to {lang}:\n\n{text}"),
                    recorded: format!("translate to {lang}: {text}"),
                    use_context: true,
                })
            }
            CompletionTask::Analyze => {
                let text = required_str(payload, keys::TEXT)?;
                let instruction = payload
                    .get(keys::INSTRUCTION)
                    .and_then(Value::as_str)
                    .unwrap_or("Analyze the following text");
                Ok(Turn {
                    prompt: format!("{instruction}:\n\n{text}"),
                    recorded: format!("{instruction}: {text}"),
                    use_context: true,
                })
            }
        }
    }
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ConcordError::InvalidContext(format!("payload is missing '{key}'")))
}

/// "remember ..." turns are stored as knowledge rather than chatter
fn user_turn_spec(text: &str) -> EntrySpec {
    let lower = text.trim_start().to_lowercase();
    if lower.starts_with("remember") {
        EntrySpec::knowledge(text)
    } else {
        EntrySpec::conversation(text).with_priority(ContextPriority::infer_from_text(text))
    }
}

#[async_trait]
impl CapabilityHandler for CompletionHandler {
    async fn handle(&self, req: CapabilityRequest<'_>) -> Result<Value> {
        let turn = self.parse(req.payload)?;
        let task = self.task.task_name();

        let context = if turn.use_context {
            req.ranker
                .rank(req.store, &RankRequest::for_query(turn.recorded.as_str()))
                .into_entries()
        } else {
            Vec::new()
        };

        debug!(
            agent = %req.store.agent_id(),
            task,
            backend = self.backend.name(),
            context_entries = context.len(),
            "Calling completion backend"
        );

        let answer = match self.backend.complete(&turn.prompt, &context).await {
            Ok(text) => text,
            Err(e) => match &self.degrade {
                DegradePolicy::Propagate => return Err(e),
                DegradePolicy::Fallback(text) => {
                    warn!(agent = %req.store.agent_id(), task, error = %e, "Backend failed; using fallback");
                    text.clone()
                }
            },
        };

        req.store.add(
            user_turn_spec(&turn.recorded)
                .with_tags(["user", task])
                .with_tag(format!("from:{}", req.message.sender_id)),
        )?;
        req.store
            .add(EntrySpec::conversation(answer.as_str()).with_tags(["assistant", task]))?;

        Ok(Value::String(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_is_knowledge() {
        let spec = user_turn_spec("Remember: the deploy key rotates monthly");
        assert_eq!(spec.context_type, crate::ContextType::Knowledge);
        let chat = user_turn_spec("urgent: server down");
        assert_eq!(chat.priority, ContextPriority::Critical);
    }

    #[test]
    fn test_translate_requires_language() {
        let handler = CompletionHandler::new(
            CompletionTask::Translate,
            Arc::new(crate::llm::EchoCompletion::new()),
        );
        assert!(handler.parse(&serde_json::json!({"text": "hi"})).is_err());
        let turn = handler
            .parse(&serde_json::json!({"text": "hi", "target_language": "pt"}))
            .unwrap();
        assert!(turn.prompt.contains("to pt"));
    }
}
