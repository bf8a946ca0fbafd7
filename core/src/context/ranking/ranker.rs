//! Relevance ranking for context entries.
//!
//! Scores every live entry of a store with
//! `priority_weight + recency_weight * 0.5^(age / half_life) + tag_weight * overlap`,
//! orders by score and hands the ordered list to the window manager for budgeting.

use crate::context::memory::ContextStore;
use crate::context::types::{ContextEntry, ContextPriority};
use crate::context::window::{
    CharEstimateCounter, ContextBudget, ContextSelection, TokenCounter, WindowManager,
};
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Ranking weights and the default budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub critical_weight: f64,
    pub high_weight: f64,
    pub medium_weight: f64,
    pub low_weight: f64,

    /// Score of a brand-new entry from recency alone
    pub recency_weight: f64,

    /// Age at which the recency term halves
    pub half_life_ms: i64,

    /// Added once per tag shared with the query
    pub tag_weight: f64,

    /// Default entry budget when a request does not carry its own
    pub max_entries: usize,

    /// Default token budget when a request does not carry its own
    pub max_tokens: Option<usize>,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            critical_weight: 1.0,
            high_weight: 0.75,
            medium_weight: 0.5,
            low_weight: 0.25,
            recency_weight: 2.0,
            half_life_ms: 3_600_000,
            tag_weight: 0.5,
            max_entries: 20,
            max_tokens: None,
        }
    }
}

impl RankerConfig {
    pub fn priority_weight(&self, priority: ContextPriority) -> f64 {
        match priority {
            ContextPriority::Critical => self.critical_weight,
            ContextPriority::High => self.high_weight,
            ContextPriority::Medium => self.medium_weight,
            ContextPriority::Low => self.low_weight,
        }
    }

    pub fn default_budget(&self) -> ContextBudget {
        ContextBudget {
            max_entries: self.max_entries,
            max_tokens: self.max_tokens,
        }
    }
}

/// What the caller is about to respond to.
#[derive(Debug, Clone, Default)]
pub struct RankRequest {
    pub query: String,
    pub tags: BTreeSet<String>,
    /// Overrides the ranker's default budget
    pub budget: Option<ContextBudget>,
}

impl RankRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Query tags are the explicit tags plus the lowercased words of the query, so
    /// an entry tagged "python" matches a question mentioning Python.
    pub fn for_query(query: impl Into<String>) -> Self {
        let query = query.into();
        let tags = query
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .filter(|w| w.len() > 2)
            .map(|w| w.to_lowercase())
            .collect();
        Self {
            query,
            tags,
            budget: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Selects and orders the context attached to a request.
pub struct ContextRanker {
    config: RankerConfig,
    window: WindowManager,
}

impl ContextRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self::with_counter(config, Arc::new(CharEstimateCounter::default()))
    }

    pub fn with_counter(config: RankerConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            config,
            window: WindowManager::new(counter),
        }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Relevance of one entry at `now_ms`. Entries from the future count as age zero.
    pub fn score(&self, entry: &ContextEntry, request: &RankRequest, now_ms: i64) -> f64 {
        let age_ms = now_ms.saturating_sub(entry.created_at_ms).max(0) as f64;
        let half_life = self.config.half_life_ms.max(1) as f64;
        let recency = self.config.recency_weight * 0.5_f64.powf(age_ms / half_life);
        let overlap = entry.tags.intersection(&request.tags).count() as f64;

        self.config.priority_weight(entry.priority) + recency + self.config.tag_weight * overlap
    }

    pub fn rank(&self, store: &ContextStore, request: &RankRequest) -> ContextSelection {
        self.rank_at(store, request, now_ms())
    }

    /// Purge, score, sort and budget the store's entries as of `now_ms`.
    pub fn rank_at(
        &self,
        store: &ContextStore,
        request: &RankRequest,
        now_ms: i64,
    ) -> ContextSelection {
        let budget = request
            .budget
            .unwrap_or_else(|| self.config.default_budget());
        if budget.is_stateless() {
            return ContextSelection::default();
        }

        store.purge_expired(now_ms);
        let ranked = self.order(store.live_entries(now_ms), request, now_ms);
        let candidates = ranked.len();
        let selection = self.window.select(ranked, budget);

        debug!(
            agent = %store.agent_id(),
            candidates,
            selected = selection.len(),
            overflow = selection.overflow.len(),
            tokens_used = selection.tokens_used,
            "Ranked context"
        );

        selection
    }

    /// Sort by score desc, then `created_at` desc, then insertion order asc.
    pub fn order(
        &self,
        entries: Vec<ContextEntry>,
        request: &RankRequest,
        now_ms: i64,
    ) -> Vec<ContextEntry> {
        let mut scored: Vec<(f64, ContextEntry)> = entries
            .into_iter()
            .map(|e| (self.score(&e, request, now_ms), e))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at_ms.cmp(&a.created_at_ms))
                .then_with(|| a.id.cmp(&b.id))
        });

        scored.into_iter().map(|(_, e)| e).collect()
    }
}

impl Default for ContextRanker {
    fn default() -> Self {
        Self::new(RankerConfig::default())
    }
}
