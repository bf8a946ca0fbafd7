// Agent: identity + own context store + capability table
use crate::config::ConcordConfig;
use crate::context::{
    ContextEntry, ContextPriority, ContextRanker, ContextStore, ContextSummary, EntrySpec,
    RankerConfig,
};
use crate::directory::AgentIdentity;
use crate::dispatcher::{CapabilityError, CapabilityHandler, CapabilityTable};
use crate::envelope::{keys, Message};
use crate::handlers::{CompletionHandler, CompletionTask, DegradePolicy};
use crate::llm::TextCompletion;
use crate::{ConcordError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Optional per-agent reaction to broadcasts, run before the broadcast is recorded.
///
/// An error means the delivery failed for this agent: nothing is recorded and the
/// failure is counted by the network.
#[async_trait]
pub trait BroadcastHook: Send + Sync {
    async fn on_broadcast(&self, message: &Message, store: &ContextStore) -> Result<()>;
}

/// An addressable participant: identity, its own context memory and the tasks it serves.
///
/// Request and broadcast processing go through a fair async gate, so an agent never
/// handles two messages at once and sequential requests are served in arrival order.
pub struct Agent {
    identity: AgentIdentity,
    store: ContextStore,
    capabilities: CapabilityTable,
    ranker: ContextRanker,
    gate: Mutex<()>,
    broadcast_hook: Option<Arc<dyn BroadcastHook>>,
    broadcast_ttl: Option<Duration>,
}

impl Agent {
    pub fn builder(agent_id: impl Into<String>, role: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(agent_id, role)
    }

    pub fn id(&self) -> &str {
        &self.identity.agent_id
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn ranker(&self) -> &ContextRanker {
        &self.ranker
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Serve a REQUEST addressed to this agent.
    ///
    /// Records the incoming request as a TASK entry, dispatches it, and on success
    /// records the response as a second TASK entry.
    pub async fn handle_request(
        &self,
        message: &Message,
    ) -> std::result::Result<Value, CapabilityError> {
        self.serve(message, || true).await
    }

    /// Serve a request on behalf of a caller waiting on `reply`.
    ///
    /// When the caller has gone (timed out or dropped the call) by the time the handler
    /// returns, the response is neither recorded nor sent.
    pub(crate) async fn handle_request_for(
        &self,
        message: &Message,
        reply: oneshot::Sender<std::result::Result<Value, CapabilityError>>,
    ) {
        let result = self.serve(message, || !reply.is_closed()).await;
        if reply.send(result).is_err() {
            debug!(agent = %self.id(), task = %message.task, "Caller gone; response discarded");
        }
    }

    async fn serve(
        &self,
        message: &Message,
        caller_waiting: impl Fn() -> bool,
    ) -> std::result::Result<Value, CapabilityError> {
        let _turn = self.gate.lock().await;

        self.record(
            EntrySpec::task(message.content.clone())
                .with_tags(["request", message.task.as_str()])
                .with_tag(format!("from:{}", message.sender_id)),
        );

        let result = self
            .capabilities
            .dispatch(self.id(), message, &self.store, &self.ranker)
            .await?;

        if caller_waiting() {
            self.record(
                EntrySpec::task(result.clone())
                    .with_tags(["response", message.task.as_str()])
                    .with_tag(format!("to:{}", message.sender_id)),
            );
        }
        Ok(result)
    }

    /// Accept a BROADCAST: run the hook, then record a SYSTEM entry whose priority
    /// comes from the payload's `priority` label (Medium when absent or unknown).
    pub async fn receive_broadcast(&self, message: &Message) -> Result<ContextEntry> {
        let _turn = self.gate.lock().await;

        if let Some(hook) = &self.broadcast_hook {
            hook.on_broadcast(message, &self.store).await?;
        }

        let priority = message
            .content_str(keys::PRIORITY)
            .and_then(|label| label.parse::<ContextPriority>().ok())
            .unwrap_or_default();

        let mut spec = EntrySpec::system(message.content.clone())
            .with_priority(priority)
            .with_tag("broadcast")
            .with_tag(format!("from:{}", message.sender_id));
        if !message.task.trim().is_empty() {
            spec = spec.with_tag(message.task.as_str());
        }
        if let Some(ttl) = self.broadcast_ttl {
            spec = spec.expires_in(ttl);
        }

        let entry = self.store.add(spec)?;
        debug!(agent = %self.id(), topic = %message.task, priority = %priority, "Recorded broadcast");
        Ok(entry)
    }

    /// Run one of this agent's own capabilities without going through the network.
    /// No TASK entries are recorded; the handler records whatever it records.
    pub async fn invoke_local(&self, task: &str, payload: Value) -> Result<Value> {
        let _turn = self.gate.lock().await;
        let message = Message::request(self.id(), self.id(), task, payload).with_role("user");
        Ok(self
            .capabilities
            .dispatch(self.id(), &message, &self.store, &self.ranker)
            .await?)
    }

    /// Chat with this agent's `chat` capability
    pub async fn chat(&self, message: &str, use_context: bool) -> Result<String> {
        let out = self
            .invoke_local(
                CompletionTask::Chat.task_name(),
                json!({ (keys::MESSAGE): message, (keys::USE_CONTEXT): use_context }),
            )
            .await?;
        Ok(value_text(out))
    }

    pub async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let out = self
            .invoke_local(
                CompletionTask::Translate.task_name(),
                json!({ (keys::TEXT): text, (keys::TARGET_LANGUAGE): target_language }),
            )
            .await?;
        Ok(value_text(out))
    }

    pub async fn analyze_text(&self, text: &str, instruction: &str) -> Result<String> {
        let out = self
            .invoke_local(
                CompletionTask::Analyze.task_name(),
                json!({ (keys::TEXT): text, (keys::INSTRUCTION): instruction }),
            )
            .await?;
        Ok(value_text(out))
    }

    /// Store something the agent was explicitly told
    pub fn remember(&self, spec: EntrySpec) -> Result<ContextEntry> {
        self.store.add(spec)
    }

    pub fn context_summary(&self) -> ContextSummary {
        self.store.summarize()
    }

    fn record(&self, spec: EntrySpec) {
        if let Err(e) = self.store.add(spec) {
            warn!(agent = %self.id(), error = %e, "Failed to record exchange");
        }
    }
}

fn value_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Builder for `Agent`
pub struct AgentBuilder {
    identity: AgentIdentity,
    handlers: Vec<(String, Arc<dyn CapabilityHandler>)>,
    completion: Option<Arc<dyn TextCompletion>>,
    degrade: DegradePolicy,
    ranker: Option<ContextRanker>,
    ranker_config: RankerConfig,
    broadcast_hook: Option<Arc<dyn BroadcastHook>>,
    broadcast_ttl: Option<Duration>,
}

impl AgentBuilder {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            identity: AgentIdentity::new(agent_id, role),
            handlers: Vec::new(),
            completion: None,
            degrade: DegradePolicy::Propagate,
            ranker: None,
            ranker_config: RankerConfig::default(),
            broadcast_hook: None,
            broadcast_ttl: None,
        }
    }

    pub fn specialty(mut self, tag: impl Into<String>) -> Self {
        self.identity = self.identity.with_specialty(tag);
        self
    }

    pub fn specialties<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity = self.identity.with_specialties(tags);
        self
    }

    pub fn capability(mut self, task: impl Into<String>, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.handlers.push((task.into(), handler));
        self
    }

    /// Register the built-in `chat`, `translate` and `analyze` capabilities on `backend`
    pub fn completion_backend(mut self, backend: Arc<dyn TextCompletion>) -> Self {
        self.completion = Some(backend);
        self
    }

    pub fn degrade(mut self, policy: DegradePolicy) -> Self {
        self.degrade = policy;
        self
    }

    pub fn ranker_config(mut self, config: RankerConfig) -> Self {
        self.ranker_config = config;
        self
    }

    /// Use a fully built ranker (e.g. with a custom token counter)
    pub fn ranker(mut self, ranker: ContextRanker) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn broadcast_hook(mut self, hook: Arc<dyn BroadcastHook>) -> Self {
        self.broadcast_hook = Some(hook);
        self
    }

    /// Expire recorded broadcasts after `ttl`
    pub fn broadcast_ttl(mut self, ttl: Duration) -> Self {
        self.broadcast_ttl = Some(ttl);
        self
    }

    /// Apply the ranking and context sections of a loaded configuration
    pub fn config(mut self, config: &ConcordConfig) -> Self {
        self.ranker_config = config.ranking.clone();
        self.broadcast_ttl = config.context.broadcast_ttl_ms.map(Duration::from_millis);
        self
    }

    /// Fails with `Registration` on an empty id or an invalid/duplicate task name
    pub fn build(self) -> Result<Agent> {
        if self.identity.agent_id.trim().is_empty() {
            return Err(ConcordError::Registration("agent id must not be empty".into()));
        }

        let capabilities = CapabilityTable::new();
        if let Some(backend) = self.completion {
            for task in [
                CompletionTask::Chat,
                CompletionTask::Translate,
                CompletionTask::Analyze,
            ] {
                let handler = CompletionHandler::new(task, Arc::clone(&backend))
                    .with_degrade(self.degrade.clone());
                capabilities.register(task.task_name(), Arc::new(handler))?;
            }
        }
        for (task, handler) in self.handlers {
            capabilities.register(&task, handler)?;
        }

        let store = ContextStore::new(self.identity.agent_id.clone());
        Ok(Agent {
            identity: self.identity,
            store,
            capabilities,
            ranker: self
                .ranker
                .unwrap_or_else(|| ContextRanker::new(self.ranker_config)),
            gate: Mutex::new(()),
            broadcast_hook: self.broadcast_hook,
            broadcast_ttl: self.broadcast_ttl,
        })
    }
}
