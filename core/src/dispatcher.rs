use crate::context::{ContextRanker, ContextStore};
use crate::envelope::Message;
use crate::{ConcordError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Validated task name: non-empty, lowercase ASCII letters, digits, `_`, `-` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

impl TaskName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')
            });
        if !valid {
            return Err(ConcordError::Registration(format!(
                "invalid task name '{name}'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskName {
    type Err = ConcordError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskName {
    type Error = ConcordError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<TaskName> for String {
    fn from(t: TaskName) -> Self {
        t.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityErrorKind {
    /// No handler registered under the task name
    UnknownTask,
    /// The handler ran and failed
    HandlerFailure,
}

impl fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityErrorKind::UnknownTask => f.write_str("unknown task"),
            CapabilityErrorKind::HandlerFailure => f.write_str("handler failure"),
        }
    }
}

/// Failure reported by the receiving agent's dispatcher
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} on {agent_id} for task '{task}': {detail}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub agent_id: String,
    pub task: String,
    pub detail: String,
}

impl CapabilityError {
    pub fn unknown_task(agent_id: &str, task: &str) -> Self {
        Self {
            kind: CapabilityErrorKind::UnknownTask,
            agent_id: agent_id.to_string(),
            task: task.to_string(),
            detail: "no handler registered".to_string(),
        }
    }

    pub fn handler_failure(agent_id: &str, task: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::HandlerFailure,
            agent_id: agent_id.to_string(),
            task: task.to_string(),
            detail: detail.into(),
        }
    }
}

/// Everything a handler may consult while serving one request
#[derive(Clone, Copy)]
pub struct CapabilityRequest<'a> {
    pub payload: &'a Value,
    pub message: &'a Message,
    /// The receiving agent's own store
    pub store: &'a ContextStore,
    pub ranker: &'a ContextRanker,
}

/// Handler for one task name on one agent
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, req: CapabilityRequest<'_>) -> Result<Value>;
}

/// Adapts a synchronous closure into a `CapabilityHandler`
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: for<'a> Fn(CapabilityRequest<'a>) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> CapabilityHandler for FnHandler<F>
where
    F: for<'a> Fn(CapabilityRequest<'a>) -> Result<Value> + Send + Sync + 'static,
{
    async fn handle(&self, req: CapabilityRequest<'_>) -> Result<Value> {
        (self.0)(req)
    }
}

/// Per-agent mapping from task name to handler
#[derive(Default)]
pub struct CapabilityTable {
    handlers: DashMap<TaskName, Arc<dyn CapabilityHandler>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Invalid or already-registered names are rejected.
    pub fn register(&self, task: &str, handler: Arc<dyn CapabilityHandler>) -> Result<()> {
        let name = TaskName::new(task)?;
        match self.handlers.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(ConcordError::Registration(
                format!("task '{}' already registered", e.key()),
            )),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                info!(target: "dispatcher", task = %e.key(), "Registering capability handler");
                e.insert(handler);
                Ok(())
            }
        }
    }

    pub fn contains(&self, task: &str) -> bool {
        TaskName::new(task)
            .map(|name| self.handlers.contains_key(&name))
            .unwrap_or(false)
    }

    /// Registered task names, sorted
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|e| e.key().as_str().to_string())
            .collect();
        names.sort();
        names
    }

    /// Route `message.task` to its handler.
    #[tracing::instrument(skip_all, fields(agent = %agent_id, task = %message.task))]
    pub async fn dispatch(
        &self,
        agent_id: &str,
        message: &Message,
        store: &ContextStore,
        ranker: &ContextRanker,
    ) -> std::result::Result<Value, CapabilityError> {
        let handler = TaskName::new(message.task.as_str())
            .ok()
            .and_then(|name| self.handlers.get(&name).map(|h| Arc::clone(h.value())));

        let Some(handler) = handler else {
            warn!(target: "dispatcher", "Unknown task");
            return Err(CapabilityError::unknown_task(agent_id, &message.task));
        };

        let req = CapabilityRequest {
            payload: &message.content,
            message,
            store,
            ranker,
        };
        match handler.handle(req).await {
            Ok(value) => {
                debug!(target: "dispatcher", "Handler completed");
                Ok(value)
            }
            Err(e) => {
                warn!(target: "dispatcher", error = %e, "Handler failed");
                Err(CapabilityError::handler_failure(
                    agent_id,
                    &message.task,
                    e.to_string(),
                ))
            }
        }
    }
}
