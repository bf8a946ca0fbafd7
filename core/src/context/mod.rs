//! Context Memory Engine
//!
//! Stores, prioritizes and expires the context each agent accumulates, and selects
//! the part of it worth attaching to a request.
//!
//! # Architecture
//!
//! - **Types**: Core types (ContextEntry, EntrySpec, ContextFilter, ContextSummary)
//! - **Memory**: The per-agent `ContextStore`
//! - **Ranking**: Relevance scoring over a store
//! - **Window**: Entry-count and token budgets

pub mod memory;
pub mod ranking;
pub mod types;
pub mod window;

pub use types::{
    ContextContent, ContextEntry, ContextFilter, ContextPriority, ContextSummary, ContextType,
    EntrySpec, Expiry,
};

pub use memory::{ContextQuery, ContextStore};

pub use ranking::{ContextRanker, RankRequest, RankerConfig};

pub use window::{
    CharEstimateCounter, ContextBudget, ContextSelection, TokenCounter, WindowManager,
};
