//! Per-agent context store.
//!
//! Entries are immutable once stored. They leave the store only through expiry,
//! either lazily (reads skip them) or physically via `purge_expired`.

use crate::context::types::{ContextEntry, ContextFilter, ContextSummary, EntrySpec};
use crate::{now_ms, Result};
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Context memory owned by exactly one agent.
///
/// Uses DashMap so short reads and writes from the messaging layer never need an
/// outer lock; ids come from a monotonic counter and double as insertion order.
pub struct ContextStore {
    agent_id: String,

    /// Main storage: entry id -> ContextEntry
    entries: DashMap<u64, ContextEntry>,

    next_id: AtomicU64,
}

impl ContextStore {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Add an entry stamped with the current time
    pub fn add(&self, spec: EntrySpec) -> Result<ContextEntry> {
        self.add_at(spec, now_ms())
    }

    /// Add an entry created at `now_ms`.
    ///
    /// Fails with `InvalidContext` when the expiration is not after creation or a tag is
    /// empty; nothing is stored in that case.
    pub fn add_at(&self, spec: EntrySpec, now_ms: i64) -> Result<ContextEntry> {
        spec.validate_tags()?;
        let expires_at_ms = spec.resolve_expiry(now_ms)?;

        let entry = ContextEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            owner_agent_id: self.agent_id.clone(),
            context_type: spec.context_type,
            priority: spec.priority,
            content: spec.content,
            created_at_ms: now_ms,
            expires_at_ms,
            tags: spec.tags,
        };

        trace!(
            agent = %self.agent_id,
            entry_id = entry.id,
            context_type = %entry.context_type,
            priority = %entry.priority,
            "Storing context entry"
        );

        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Retrieve a specific entry by id, expired or not
    pub fn get(&self, id: u64) -> Option<ContextEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    /// Query live entries as of now
    pub fn query(&self, filter: ContextFilter) -> ContextQuery {
        self.query_at(filter, now_ms())
    }

    /// Query entries that are live at `now_ms`, ordered by priority (desc), then
    /// creation time (desc), then insertion order (desc).
    pub fn query_at(&self, filter: ContextFilter, now_ms: i64) -> ContextQuery {
        let mut entries = self.live_entries(now_ms);
        entries.sort_by(discovery_order);

        trace!(
            agent = %self.agent_id,
            candidates = entries.len(),
            "Querying context entries"
        );

        ContextQuery { entries, filter }
    }

    pub fn summarize(&self) -> ContextSummary {
        self.summarize_at(now_ms())
    }

    /// Aggregate counts over entries live at `now_ms`
    pub fn summarize_at(&self, now_ms: i64) -> ContextSummary {
        let mut summary = ContextSummary::default();
        for entry in self.entries.iter() {
            let entry = entry.value();
            if entry.is_expired(now_ms) {
                continue;
            }
            summary.total_contexts += 1;
            summary.context_types.insert(entry.context_type);
            *summary
                .priority_distribution
                .entry(entry.priority)
                .or_insert(0) += 1;
        }
        summary
    }

    /// Physically remove entries whose `expires_at <= now_ms`. Returns how many were removed.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(agent = %self.agent_id, removed, "Purged expired context entries");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of live entries in insertion order, for a persistence collaborator
    pub fn export_contexts(&self) -> Vec<ContextEntry> {
        self.export_at(now_ms())
    }

    pub fn export_at(&self, now_ms: i64) -> Vec<ContextEntry> {
        let mut entries = self.live_entries(now_ms);
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Restore previously exported entries.
    ///
    /// Ids and owner are re-stamped for this store; timestamps, tags, type and priority
    /// are kept. Entries already expired are skipped. Returns the number imported.
    pub fn import_contexts(&self, entries: Vec<ContextEntry>) -> Result<usize> {
        self.import_at(entries, now_ms())
    }

    pub fn import_at(&self, entries: Vec<ContextEntry>, now_ms: i64) -> Result<usize> {
        let mut imported = 0;
        for mut entry in entries {
            if entry.is_expired(now_ms) {
                continue;
            }
            if let Some(exp) = entry.expires_at_ms {
                if exp <= entry.created_at_ms {
                    return Err(crate::ConcordError::InvalidContext(format!(
                        "imported entry {} expires before it was created",
                        entry.id
                    )));
                }
            }
            entry.id = self.next_id.fetch_add(1, Ordering::Relaxed);
            entry.owner_agent_id = self.agent_id.clone();
            self.entries.insert(entry.id, entry);
            imported += 1;
        }
        debug!(agent = %self.agent_id, imported, "Imported context entries");
        Ok(imported)
    }

    /// Live entries in arbitrary order
    pub(crate) fn live_entries(&self, now_ms: i64) -> Vec<ContextEntry> {
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now_ms))
            .map(|e| e.value().clone())
            .collect()
    }
}

/// Priority desc, then recency desc, then later insertion first
fn discovery_order(a: &ContextEntry, b: &ContextEntry) -> CmpOrdering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at_ms.cmp(&a.created_at_ms))
        .then_with(|| b.id.cmp(&a.id))
}

/// Result of `ContextStore::query`.
///
/// Holds an ordered snapshot taken at query time; the filter is applied while
/// iterating, and the sequence can be iterated any number of times.
#[derive(Debug, Clone)]
pub struct ContextQuery {
    entries: Vec<ContextEntry>,
    filter: ContextFilter,
}

impl ContextQuery {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &ContextEntry> + '_> {
        let limit = self.filter.limit.unwrap_or(usize::MAX);
        Box::new(
            self.entries
                .iter()
                .filter(move |e| self.filter.matches(e))
                .take(limit),
        )
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<ContextEntry> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a ContextQuery {
    type Item = &'a ContextEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a ContextEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
