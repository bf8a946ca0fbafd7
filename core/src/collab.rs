use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::{ConcordConfig, MessagingConfig};
use crate::context::EntrySpec;
use crate::directory::AgentDirectory;
use crate::dispatcher::CapabilityError;
use crate::envelope::Message;
use crate::telemetry::{MessagingStats, StatsSnapshot};
use crate::{now_ms, ConcordError, Result};

/// Lifecycle of one point-to-point request, observable by correlation id.
///
/// `Created -> Sent -> AwaitingResponse -> Resolved | Failed | TimedOut`, or
/// `Cancelled` when the caller drops the call before it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Created,
    Sent,
    AwaitingResponse,
    Resolved,
    Failed,
    TimedOut,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Resolved
                | RequestState::Failed
                | RequestState::TimedOut
                | RequestState::Cancelled
        )
    }
}

/// How `discover_and_request_with` uses the list of capable agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPolicy {
    /// Ask the earliest-registered match only
    #[default]
    First,
    /// Walk the matches in registration order until one succeeds
    FirstSuccessful,
    /// Ask every match concurrently
    All,
}

/// Outcome of one request made during discovery
#[derive(Debug)]
pub struct AgentReply {
    pub agent_id: String,
    pub result: Result<Value>,
}

impl AgentReply {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }
}

/// Per-recipient result of a broadcast delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutcome {
    pub agent_id: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Handle returned by `broadcast`.
///
/// Deliveries run on their own tasks; dropping the receipt does not cancel them.
pub struct BroadcastReceipt {
    topic: String,
    recipients: Vec<String>,
    deliveries: Vec<(String, JoinHandle<BroadcastOutcome>)>,
}

impl BroadcastReceipt {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Recipients in registration order
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Wait for every delivery and report per-recipient outcomes in recipient order
    pub async fn settled(self) -> Vec<BroadcastOutcome> {
        let mut out = Vec::with_capacity(self.deliveries.len());
        for (agent_id, handle) in self.deliveries {
            match handle.await {
                Ok(outcome) => out.push(outcome),
                Err(e) => out.push(BroadcastOutcome {
                    agent_id,
                    delivered: false,
                    error: Some(format!("delivery task failed: {e}")),
                }),
            }
        }
        out
    }
}

/// In-process A2A network: the registry plus the endpoints of registered agents.
///
/// Constructed explicitly and shared through `Arc`; there is no global instance.
pub struct AgentNetwork {
    directory: AgentDirectory,
    agents: DashMap<String, Arc<Agent>>,
    config: MessagingConfig,
    stats: MessagingStats,
    // correlation_id -> (seq, state)
    states: DashMap<String, (u64, RequestState)>,
    next_seq: AtomicU64,
}

impl AgentNetwork {
    pub fn new(config: MessagingConfig) -> Arc<Self> {
        Arc::new(Self {
            directory: AgentDirectory::new(),
            agents: DashMap::new(),
            config,
            stats: MessagingStats::new(),
            states: DashMap::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &ConcordConfig) -> Arc<Self> {
        Self::new(config.messaging.clone())
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    /// Register an agent and advertise its specialties. An agent with the same id is
    /// replaced.
    pub fn register(&self, agent: Agent) -> Arc<Agent> {
        let agent = Arc::new(agent);
        self.register_shared(Arc::clone(&agent));
        agent
    }

    pub fn register_shared(&self, agent: Arc<Agent>) {
        let id = agent.id().to_string();
        self.directory.register(agent.identity().clone());
        if self.agents.insert(id.clone(), agent).is_some() {
            warn!(target: "collab", agent = %id, "Replaced previously registered agent");
        } else {
            info!(target: "collab", agent = %id, "Agent joined network");
        }
    }

    /// Remove an agent; unknown ids are ignored
    pub fn deregister(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.directory.deregister(agent_id);
        let removed = self.agents.remove(agent_id).map(|(_, a)| a);
        if removed.is_some() {
            info!(target: "collab", agent = %agent_id, "Agent left network");
        }
        removed
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.get(agent_id).map(|a| Arc::clone(a.value()))
    }

    /// Registered agent ids in registration order
    pub fn agent_ids(&self) -> Vec<String> {
        self.directory
            .all()
            .into_iter()
            .map(|i| i.agent_id)
            .filter(|id| self.agents.contains_key(id))
            .collect()
    }

    /// Handle for making calls on behalf of `agent_id`
    pub fn collaborator(self: &Arc<Self>, agent_id: &str) -> Result<Collaborator> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| ConcordError::AgentNotFound(agent_id.to_string()))?;
        Ok(Collaborator {
            network: Arc::clone(self),
            agent,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn request_state(&self, correlation_id: &str) -> Option<RequestState> {
        self.states.get(correlation_id).map(|s| s.value().1)
    }

    /// Purge expired entries in every registered agent's store
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let agents: Vec<Arc<Agent>> = self.agents.iter().map(|a| Arc::clone(a.value())).collect();
        let purged: usize = agents.iter().map(|a| a.store().purge_expired(now_ms)).sum();
        if purged > 0 {
            self.stats.record_purged(purged);
            debug!(target: "collab", purged, "Expiry sweep");
        }
        purged
    }

    /// Run `sweep_expired` every `interval` until the network is dropped
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(network) = weak.upgrade() else {
                    break;
                };
                network.sweep_expired(now_ms());
            }
        })
    }

    fn set_state(&self, correlation_id: &str, state: RequestState) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.states
            .entry(correlation_id.to_string())
            .and_modify(|s| s.1 = state)
            .or_insert((seq, state));
        if state.is_terminal() {
            self.trim_states(self.config.state_history_limit);
        }
    }

    fn trim_states(&self, max: usize) {
        // trim in batches to keep the sort off the hot path
        if self.states.len() <= max + 16 {
            return;
        }
        let mut finished: Vec<(u64, String)> = self
            .states
            .iter()
            .filter(|e| e.value().1.is_terminal())
            .map(|e| (e.value().0, e.key().clone()))
            .collect();
        finished.sort();
        let excess = self.states.len().saturating_sub(max);
        for (_, key) in finished.into_iter().take(excess) {
            self.states.remove(&key);
        }
    }
}

/// Marks a request `Cancelled` if the call is dropped before it settles
struct RequestTracker<'a> {
    network: &'a AgentNetwork,
    correlation_id: String,
    finished: bool,
}

impl<'a> RequestTracker<'a> {
    fn new(network: &'a AgentNetwork, correlation_id: String) -> Self {
        network.set_state(&correlation_id, RequestState::Created);
        Self {
            network,
            correlation_id,
            finished: false,
        }
    }

    fn advance(&self, state: RequestState) {
        self.network.set_state(&self.correlation_id, state);
    }

    fn finish(&mut self, state: RequestState) {
        self.finished = true;
        self.network.set_state(&self.correlation_id, state);
    }
}

impl Drop for RequestTracker<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.network
                .set_state(&self.correlation_id, RequestState::Cancelled);
            self.network.stats.record_request_cancelled();
            debug!(target: "collab", correlation_id = %self.correlation_id, "Request cancelled by caller");
        }
    }
}

/// Per-caller handle onto an `AgentNetwork`.
///
/// `Collaborator` provides the A2A patterns on behalf of one registered agent:
///
/// 1. **Request-Response**: synchronous call into another agent's capability table
/// 2. **Broadcast**: fire-and-forget notice to every other registered agent
/// 3. **Discovery**: registry lookup by capability tag, then request
///
/// Both sides of every request/response exchange record it in their own context store.
///
/// # Examples
///
/// ```
/// use concord_core::{Agent, AgentNetwork, FnHandler, MessagingConfig};
/// use serde_json::json;
///
/// # async fn example() -> concord_core::Result<()> {
/// let network = AgentNetwork::new(MessagingConfig::default());
/// network.register(Agent::builder("agent.writer", "writer").build()?);
/// network.register(
///     Agent::builder("agent.echo", "echo")
///         .specialty("echo")
///         .capability("echo", FnHandler::new(|req| Ok(req.payload.clone())))
///         .build()?,
/// );
///
/// let writer = network.collaborator("agent.writer")?;
/// let out = writer.send_request("agent.echo", "echo", json!({"x": 1})).await?;
/// assert_eq!(out, json!({"x": 1}));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Collaborator {
    network: Arc<AgentNetwork>,
    agent: Arc<Agent>,
}

impl Collaborator {
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn network(&self) -> &Arc<AgentNetwork> {
        &self.network
    }

    /// Request with the network's configured deadline
    pub async fn send_request(&self, target: &str, task: &str, payload: Value) -> Result<Value> {
        let deadline = self.network.config.request_timeout();
        self.send_request_with_timeout(target, task, payload, deadline)
            .await
    }

    /// Send a REQUEST and wait for the RESPONSE.
    ///
    /// The target processes on its own task, so an expired deadline or a dropped call
    /// never interrupts it. A response nobody is waiting for is recorded on neither side.
    ///
    /// # Errors
    ///
    /// * `AgentNotFound` - `target` is not registered
    /// * `Capability` - unknown task or handler failure on the target
    /// * `Timeout` - `deadline` elapsed first
    #[tracing::instrument(skip(self, payload, deadline), fields(sender = %self.agent.id(), correlation_id = tracing::field::Empty))]
    pub async fn send_request_with_timeout(
        &self,
        target: &str,
        task: &str,
        payload: Value,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let target_agent = self
            .network
            .agent(target)
            .ok_or_else(|| ConcordError::AgentNotFound(target.to_string()))?;

        let message = Message::request(self.agent.id(), target, task, payload);
        let correlation_id = message.correlation_id.clone().unwrap_or_default();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());
        let mut tracker = RequestTracker::new(&self.network, correlation_id);

        self.record(
            EntrySpec::task(message.content.clone())
                .with_tags(["request", task])
                .with_tag(format!("to:{target}")),
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let message = message.clone();
            tokio::spawn(async move { target_agent.handle_request_for(&message, reply_tx).await });
        }
        tracker.advance(RequestState::Sent);
        self.network.stats.record_request_sent();
        tracker.advance(RequestState::AwaitingResponse);

        let received = match deadline {
            Some(d) => match timeout(d, reply_rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracker.finish(RequestState::TimedOut);
                    self.network.stats.record_request_timed_out();
                    warn!(target: "collab", %target, %task, timeout_ms = d.as_millis() as u64, "Request timed out");
                    return Err(ConcordError::Timeout {
                        target: target.to_string(),
                        task: task.to_string(),
                        timeout_ms: d.as_millis() as u64,
                    });
                }
            },
            None => reply_rx.await,
        };

        let outcome = received.unwrap_or_else(|_| {
            Err(CapabilityError::handler_failure(
                target,
                task,
                "target task ended without replying",
            ))
        });

        match outcome {
            Ok(value) => {
                self.record(
                    EntrySpec::task(value.clone())
                        .with_tags(["response", task])
                        .with_tag(format!("from:{target}")),
                );
                tracker.finish(RequestState::Resolved);
                self.network.stats.record_request_resolved();
                debug!(target: "collab", %target, %task, "Request resolved");
                Ok(value)
            }
            Err(e) => {
                tracker.finish(RequestState::Failed);
                self.network.stats.record_request_failed();
                debug!(target: "collab", %target, %task, error = %e, "Request failed");
                Err(e.into())
            }
        }
    }

    /// Deliver a BROADCAST on `topic` to every registered agent except this one.
    ///
    /// Returns as soon as deliveries are spawned. Recipient failures are logged and
    /// counted; they never surface here.
    pub fn broadcast(&self, topic: &str, payload: Value) -> BroadcastReceipt {
        let message = Message::broadcast(self.agent.id(), topic, payload);
        self.network.stats.record_broadcast();

        let recipients: Vec<Arc<Agent>> = self
            .network
            .agent_ids()
            .into_iter()
            .filter(|id| id != self.agent.id())
            .filter_map(|id| self.network.agent(&id))
            .collect();

        info!(target: "collab", sender = %self.agent.id(), %topic, recipients = recipients.len(), "Broadcasting");

        let mut deliveries = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let recipient = Arc::clone(recipient);
            let network = Arc::clone(&self.network);
            let message = message.clone();
            let agent_id = recipient.id().to_string();
            let handle = tokio::spawn(async move {
                let result = recipient.receive_broadcast(&message).await;
                network.stats.record_broadcast_delivery(result.is_ok());
                match result {
                    Ok(_) => BroadcastOutcome {
                        agent_id: recipient.id().to_string(),
                        delivered: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!(target: "collab", agent = %recipient.id(), topic = %message.task, error = %e, "Broadcast delivery failed");
                        BroadcastOutcome {
                            agent_id: recipient.id().to_string(),
                            delivered: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            });
            deliveries.push((agent_id, handle));
        }

        BroadcastReceipt {
            topic: topic.to_string(),
            recipients: recipients.iter().map(|a| a.id().to_string()).collect(),
            deliveries,
        }
    }

    /// Find agents advertising `capability` (excluding this one) and ask the first
    pub async fn discover_and_request(
        &self,
        capability: &str,
        task: &str,
        payload: Value,
    ) -> Result<Value> {
        let candidates = self.candidates(capability)?;
        self.send_request(&candidates[0], task, payload).await
    }

    /// Discovery with an explicit policy. Replies are in registration order; with
    /// `FirstSuccessful` the last reply is the success, if any.
    pub async fn discover_and_request_with(
        &self,
        capability: &str,
        task: &str,
        payload: Value,
        policy: DiscoveryPolicy,
    ) -> Result<Vec<AgentReply>> {
        let candidates = self.candidates(capability)?;

        match policy {
            DiscoveryPolicy::First => {
                let agent_id = candidates[0].clone();
                let result = self.send_request(&agent_id, task, payload).await;
                Ok(vec![AgentReply { agent_id, result }])
            }
            DiscoveryPolicy::FirstSuccessful => {
                let mut replies = Vec::new();
                for agent_id in candidates {
                    let result = self.send_request(&agent_id, task, payload.clone()).await;
                    let ok = result.is_ok();
                    if !ok {
                        debug!(target: "collab", agent = %agent_id, %capability, "Candidate failed; trying next");
                    }
                    replies.push(AgentReply { agent_id, result });
                    if ok {
                        break;
                    }
                }
                Ok(replies)
            }
            DiscoveryPolicy::All => {
                let handles: Vec<(String, JoinHandle<Result<Value>>)> = candidates
                    .into_iter()
                    .map(|agent_id| {
                        let me = self.clone();
                        let payload = payload.clone();
                        let task = task.to_string();
                        let target = agent_id.clone();
                        let handle =
                            tokio::spawn(async move { me.send_request(&target, &task, payload).await });
                        (agent_id, handle)
                    })
                    .collect();

                let mut replies = Vec::with_capacity(handles.len());
                for (agent_id, handle) in handles {
                    let result = handle.await.unwrap_or_else(|e| {
                        Err(CapabilityError::handler_failure(
                            &agent_id,
                            task,
                            format!("request task aborted: {e}"),
                        )
                        .into())
                    });
                    replies.push(AgentReply { agent_id, result });
                }
                Ok(replies)
            }
        }
    }

    fn candidates(&self, capability: &str) -> Result<Vec<String>> {
        let candidates: Vec<String> = self
            .network
            .directory
            .find_agent_by_capability(capability)
            .into_iter()
            .filter(|id| id != self.agent.id())
            .collect();
        if candidates.is_empty() {
            return Err(ConcordError::NoCapableAgent(capability.to_string()));
        }
        Ok(candidates)
    }

    fn record(&self, spec: EntrySpec) {
        if let Err(e) = self.agent.store().add(spec) {
            warn!(target: "collab", agent = %self.agent.id(), error = %e, "Failed to record exchange");
        }
    }
}
