//! Window Management
//!
//! Takes an ordered candidate list and keeps what fits the context budget.

use crate::context::types::ContextEntry;
use crate::context::window::token_counter::TokenCounter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bound on how much context is attached to one request.
///
/// `max_entries == 0` means stateless mode: nothing is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub max_entries: usize,

    /// Optional content-size bound, in estimated tokens
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

impl ContextBudget {
    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            max_tokens: None,
        }
    }

    /// Attach no context at all
    pub fn stateless() -> Self {
        Self::entries(0)
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn is_stateless(&self) -> bool {
        self.max_entries == 0 || self.max_tokens == Some(0)
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::entries(20)
    }
}

/// Result of window selection
#[derive(Debug, Clone, Default)]
pub struct ContextSelection {
    /// Entries that fit, in rank order
    pub selected: Vec<ContextEntry>,

    /// Total estimated tokens used
    pub tokens_used: usize,

    /// Entries that were ranked but did not fit
    pub overflow: Vec<ContextEntry>,
}

impl ContextSelection {
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContextEntry> {
        self.selected.iter()
    }

    pub fn into_entries(self) -> Vec<ContextEntry> {
        self.selected
    }
}

/// Applies a `ContextBudget` to a ranked list
pub struct WindowManager {
    counter: Arc<dyn TokenCounter>,
}

impl WindowManager {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Estimated size of one entry: its text rendering plus a small fixed overhead for
    /// the type/priority header it gets in a prompt.
    pub fn count_entry(&self, entry: &ContextEntry) -> usize {
        self.counter.count_text(entry.text()) + 4
    }

    /// Keep entries in order until the entry count is reached.
    ///
    /// An entry that would exceed the token budget goes to overflow and selection
    /// continues, so a smaller entry further down may still fit.
    pub fn select(&self, ranked: Vec<ContextEntry>, budget: ContextBudget) -> ContextSelection {
        let mut selection = ContextSelection::default();

        for entry in ranked {
            if selection.selected.len() >= budget.max_entries {
                selection.overflow.push(entry);
                continue;
            }

            let entry_tokens = self.count_entry(&entry);
            if let Some(max_tokens) = budget.max_tokens {
                if selection.tokens_used + entry_tokens > max_tokens {
                    selection.overflow.push(entry);
                    continue;
                }
            }

            selection.tokens_used += entry_tokens;
            selection.selected.push(entry);
        }

        selection
    }
}
