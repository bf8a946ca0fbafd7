// Concord Core Library
// Context memory and agent-to-agent messaging runtime

pub mod agent;
pub mod analysis;
pub mod collab;
pub mod config;
pub mod context;
pub mod directory;
pub mod dispatcher;
pub mod envelope;
pub mod handlers;
pub mod llm;
pub mod telemetry;

// Export core types
pub use agent::{Agent, AgentBuilder, BroadcastHook};
pub use analysis::{analyze_conversation, ConversationAnalysis};
pub use collab::{
    AgentNetwork, AgentReply, BroadcastOutcome, BroadcastReceipt, Collaborator, DiscoveryPolicy,
    RequestState,
};
pub use config::{ConcordConfig, ContextConfig, MessagingConfig};
pub use context::{
    CharEstimateCounter, ContextBudget, ContextContent, ContextEntry, ContextFilter,
    ContextPriority, ContextQuery, ContextRanker, ContextSelection, ContextStore, ContextSummary,
    ContextType, EntrySpec, Expiry, RankRequest, RankerConfig, TokenCounter,
};
pub use directory::{AgentDirectory, AgentIdentity};
pub use dispatcher::{
    CapabilityError, CapabilityErrorKind, CapabilityHandler, CapabilityRequest, CapabilityTable,
    FnHandler, TaskName,
};
pub use envelope::{deserialize, serialize, Message, MessageType};
pub use handlers::{CompletionHandler, CompletionTask, DegradePolicy};
pub use llm::{EchoCompletion, HttpCompletion, LlmClientConfig, TextCompletion};
pub use telemetry::{init_tracing, MessagingStats, StatsSnapshot};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("No agent advertises capability: {0}")]
    NoCapableAgent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Request to {target} ({task}) timed out after {timeout_ms}ms")]
    Timeout {
        target: String,
        task: String,
        timeout_ms: u64,
    },

    #[error("Generative backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, ConcordError>;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
