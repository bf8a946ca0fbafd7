use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who an agent is and which capability tags it advertises
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub role: String,
    /// Capability tags, in the order the agent lists them
    pub specialties: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        let specialty = specialty.into();
        if !self.specialties.contains(&specialty) {
            self.specialties.push(specialty);
        }
        self
    }

    pub fn with_specialties<I, S>(mut self, specialties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for s in specialties {
            self = self.with_specialty(s);
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_specialty(&self, tag: &str) -> bool {
        self.specialties.iter().any(|s| s == tag)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    seq: u64,
    identity: AgentIdentity,
}

/// In-memory directory of agents.
///
/// Lookups return agents in registration order; re-registering an id replaces its
/// identity and moves it to the back.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: DashMap<String, Registration>,
    capability_index: DashMap<String, HashSet<String>>, // capability -> agent_ids
    next_seq: AtomicU64,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: AgentIdentity) {
        let id = identity.agent_id.clone();
        // Remove old indexes if exists
        self.remove_indexes(&id);

        for c in &identity.specialties {
            self.capability_index
                .entry(c.clone())
                .or_default()
                .insert(id.clone());
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(agent = %id, seq, specialties = ?identity.specialties, "Registered agent");
        self.agents.insert(id, Registration { seq, identity });
    }

    /// Remove an agent and its index entries. Unknown ids are ignored.
    pub fn deregister(&self, agent_id: &str) -> Option<AgentIdentity> {
        self.remove_indexes(agent_id);
        let removed = self.agents.remove(agent_id).map(|(_, r)| r.identity);
        if removed.is_some() {
            debug!(agent = %agent_id, "Deregistered agent");
        }
        removed
    }

    fn remove_indexes(&self, agent_id: &str) {
        let old = match self.agents.get(agent_id) {
            Some(r) => r.identity.specialties.clone(),
            None => return,
        };
        for c in old {
            if let Some(mut set) = self.capability_index.get_mut(&c) {
                set.remove(agent_id);
            }
        }
        self.capability_index.retain(|_, set| !set.is_empty());
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentIdentity> {
        self.agents.get(agent_id).map(|r| r.identity.clone())
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Agents advertising `tag`, oldest registration first
    pub fn find_agent_by_capability(&self, tag: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .capability_index
            .get(tag)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        self.in_registration_order(ids)
    }

    /// All identities, oldest registration first
    pub fn all(&self) -> Vec<AgentIdentity> {
        let mut regs: Vec<Registration> = self.agents.iter().map(|r| r.clone()).collect();
        regs.sort_by_key(|r| r.seq);
        regs.into_iter().map(|r| r.identity).collect()
    }

    /// Distinct capability tags currently advertised
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .capability_index
            .iter()
            .map(|e| e.key().clone())
            .collect();
        caps.sort();
        caps
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn in_registration_order(&self, ids: Vec<String>) -> Vec<String> {
        let mut keyed: Vec<(u64, String)> = ids
            .into_iter()
            .filter_map(|id| self.agents.get(&id).map(|r| (r.seq, id)))
            .collect();
        keyed.sort_by_key(|(seq, _)| *seq);
        keyed.into_iter().map(|(_, id)| id).collect()
    }
}
