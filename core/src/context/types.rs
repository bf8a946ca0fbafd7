//! Core types for the context system.
//!
//! This module defines the fundamental types used throughout the context engine:
//! - ContextEntry: The atomic unit of remembered information
//! - ContextContent: The opaque payload and its text rendering
//! - EntrySpec: What a caller supplies when adding context
//! - ContextFilter / ContextSummary: Query and aggregate views

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{ConcordError, Result};

/// The kind of information an entry carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    /// A chat turn, either side
    Conversation,
    /// A request or response exchanged with another agent
    Task,
    /// Something the agent was explicitly told to remember
    Knowledge,
    /// Notifications and broadcasts from the system or peers
    System,
}

impl ContextType {
    pub const ALL: [ContextType; 4] = [
        ContextType::Conversation,
        ContextType::Task,
        ContextType::Knowledge,
        ContextType::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Conversation => "conversation",
            ContextType::Task => "task",
            ContextType::Knowledge => "knowledge",
            ContextType::System => "system",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = ConcordError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversation" | "chat" => Ok(ContextType::Conversation),
            "task" => Ok(ContextType::Task),
            "knowledge" => Ok(ContextType::Knowledge),
            "system" => Ok(ContextType::System),
            other => Err(ConcordError::InvalidContext(format!(
                "unknown context type '{other}'"
            ))),
        }
    }
}

/// Ordinal importance of an entry. Declaration order gives `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContextPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ContextPriority {
    pub const ALL: [ContextPriority; 4] = [
        ContextPriority::Critical,
        ContextPriority::High,
        ContextPriority::Medium,
        ContextPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextPriority::Low => "low",
            ContextPriority::Medium => "medium",
            ContextPriority::High => "high",
            ContextPriority::Critical => "critical",
        }
    }

    /// Guess a priority from free text. Used for chat turns where the caller gives no
    /// explicit priority.
    pub fn infer_from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        const CRITICAL: [&str; 4] = ["urgent", "critical", "emergency", "outage"];
        const HIGH: [&str; 4] = ["important", "deadline", "asap", "meeting"];
        if CRITICAL.iter().any(|k| lower.contains(k)) {
            ContextPriority::Critical
        } else if HIGH.iter().any(|k| lower.contains(k)) {
            ContextPriority::High
        } else {
            ContextPriority::Medium
        }
    }
}

impl Default for ContextPriority {
    fn default() -> Self {
        ContextPriority::Medium
    }
}

impl fmt::Display for ContextPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextPriority {
    type Err = ConcordError;

    /// Accepts the canonical names plus the labels peers put in payloads
    /// ("urgent", "normal").
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "urgent" => Ok(ContextPriority::Critical),
            "high" => Ok(ContextPriority::High),
            "medium" | "normal" => Ok(ContextPriority::Medium),
            "low" => Ok(ContextPriority::Low),
            other => Err(ConcordError::InvalidContext(format!(
                "unknown context priority '{other}'"
            ))),
        }
    }
}

/// The content of a context entry.
///
/// `raw` is never interpreted by the engine; `text` is the rendering used for
/// free-text matching and prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextContent {
    /// Original payload (opaque)
    pub raw: Value,

    /// Text representation for display and retrieval
    pub text: String,
}

impl ContextContent {
    /// Create content from a JSON value
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            v => v.to_string(),
        };
        Self { raw: value, text }
    }

    /// Create content from a string
    pub fn from_string(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: Value::String(text.clone()),
            text,
        }
    }
}

impl From<&str> for ContextContent {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for ContextContent {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<Value> for ContextContent {
    fn from(v: Value) -> Self {
        Self::from_value(v)
    }
}

/// One unit of remembered information. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    /// Unique, monotonic within the owning store
    pub id: u64,

    /// Agent whose store holds this entry
    pub owner_agent_id: String,

    pub context_type: ContextType,

    pub priority: ContextPriority,

    pub content: ContextContent,

    /// Creation time (Unix milliseconds)
    pub created_at_ms: i64,

    /// Expiration time (Unix milliseconds); `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,

    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ContextEntry {
    /// True once `now_ms` has reached the expiration time
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(exp) if exp <= now_ms)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn text(&self) -> &str {
        &self.content.text
    }
}

/// When an entry should expire, relative to its creation or at a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    After(Duration),
    At(i64),
}

/// Input to `ContextStore::add`.
#[derive(Debug, Clone)]
pub struct EntrySpec {
    pub context_type: ContextType,
    pub priority: ContextPriority,
    pub content: ContextContent,
    pub expiry: Option<Expiry>,
    pub tags: BTreeSet<String>,
}

impl EntrySpec {
    pub fn new(
        context_type: ContextType,
        priority: ContextPriority,
        content: impl Into<ContextContent>,
    ) -> Self {
        Self {
            context_type,
            priority,
            content: content.into(),
            expiry: None,
            tags: BTreeSet::new(),
        }
    }

    /// Build a spec from textual labels, as they arrive in peer payloads.
    pub fn from_labels(
        context_type: &str,
        priority: &str,
        content: impl Into<ContextContent>,
    ) -> Result<Self> {
        Ok(Self::new(context_type.parse()?, priority.parse()?, content))
    }

    pub fn conversation(content: impl Into<ContextContent>) -> Self {
        Self::new(ContextType::Conversation, ContextPriority::Medium, content)
    }

    pub fn task(content: impl Into<ContextContent>) -> Self {
        Self::new(ContextType::Task, ContextPriority::Medium, content)
    }

    pub fn knowledge(content: impl Into<ContextContent>) -> Self {
        Self::new(ContextType::Knowledge, ContextPriority::High, content)
    }

    pub fn system(content: impl Into<ContextContent>) -> Self {
        Self::new(ContextType::System, ContextPriority::Medium, content)
    }

    pub fn with_priority(mut self, priority: ContextPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Expire `ttl` after creation
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expiry = Some(Expiry::After(ttl));
        self
    }

    /// Expire at a fixed Unix millisecond timestamp
    pub fn expires_at(mut self, at_ms: i64) -> Self {
        self.expiry = Some(Expiry::At(at_ms));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Resolve the expiration against a creation time, enforcing `expires_at > created_at`.
    pub(crate) fn resolve_expiry(&self, created_at_ms: i64) -> Result<Option<i64>> {
        let expires_at = match self.expiry {
            None => return Ok(None),
            Some(Expiry::After(ttl)) => {
                created_at_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
            }
            Some(Expiry::At(at)) => at,
        };
        if expires_at <= created_at_ms {
            return Err(ConcordError::InvalidContext(format!(
                "expiration {expires_at} must be after creation {created_at_ms}"
            )));
        }
        Ok(Some(expires_at))
    }

    pub(crate) fn validate_tags(&self) -> Result<()> {
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ConcordError::InvalidContext("empty tag".into()));
        }
        Ok(())
    }
}

/// Filter for `ContextStore::query`. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub context_type: Option<ContextType>,
    pub min_priority: Option<ContextPriority>,
    pub tag: Option<String>,
    /// Case-insensitive substring of the entry text
    pub text: Option<String>,
    pub limit: Option<usize>,
}

impl ContextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, context_type: ContextType) -> Self {
        self.context_type = Some(context_type);
        self
    }

    pub fn min_priority(mut self, priority: ContextPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, entry: &ContextEntry) -> bool {
        if let Some(t) = self.context_type {
            if entry.context_type != t {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if entry.priority < min {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !entry.has_tag(tag) {
                return false;
            }
        }
        if let Some(ref needle) = self.text {
            if !entry
                .content
                .text
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Aggregate view over the non-expired entries of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextSummary {
    pub total_contexts: usize,
    pub context_types: BTreeSet<ContextType>,
    pub priority_distribution: BTreeMap<ContextPriority, usize>,
}
