use std::fs;
use std::path::Path;

use concord_core::ConcordConfig;

/// Which completion backend the demo agents use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Offline echo backend; no network required
    #[default]
    Echo,
    /// OpenAI-compatible HTTP endpoint configured by the `[llm]` section
    Http,
}

impl BackendKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "echo" => Some(BackendKind::Echo),
            "http" | "llm" => Some(BackendKind::Http),
            _ => None,
        }
    }
}

/// One member of the demo team
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberConfig {
    pub id: String,
    pub role: String,
    pub specialties: Vec<String>,
}

impl MemberConfig {
    fn new(id: &str, role: &str, specialties: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            specialties: specialties.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// High-level configuration for the team demo
#[derive(Clone, Debug)]
pub struct TeamAgentsConfig {
    pub backend: BackendKind,
    pub members: Vec<MemberConfig>,
    /// Network, ranking and LLM settings shared by every member
    pub concord: ConcordConfig,
}

impl Default for TeamAgentsConfig {
    fn default() -> Self {
        Self {
            backend: std::env::var("TEAM_AGENTS_BACKEND")
                .ok()
                .and_then(|v| BackendKind::parse(&v))
                .unwrap_or_default(),
            members: vec![
                MemberConfig::new("agent.writer", "writer", &["writing", "summarization"]),
                MemberConfig::new("agent.translator", "translator", &["translation"]),
                MemberConfig::new("agent.analyst", "analyst", &["analysis", "summarization"]),
            ],
            concord: ConcordConfig::load(),
        }
    }
}

impl TeamAgentsConfig {
    /// Load configuration from a TOML file (path via TEAM_AGENTS_CONFIG or ./team_agents.toml),
    /// overlaying values onto defaults and env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path =
            std::env::var("TEAM_AGENTS_CONFIG").unwrap_or_else(|_| "team_agents.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "team_agents", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<TeamAgentsToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target = "team_agents", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "team_agents", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// First member advertising `specialty`
    pub fn member_with(&self, specialty: &str) -> Option<&MemberConfig> {
        self.members
            .iter()
            .find(|m| m.specialties.iter().any(|s| s == specialty))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TeamAgentsToml {
    backend: Option<String>,
    request_timeout_ms: Option<u64>,
    members: Option<Vec<MemberToml>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct MemberToml {
    id: String,
    role: String,
    #[serde(default)]
    specialties: Vec<String>,
}

impl TeamAgentsToml {
    fn overlay(self, mut base: TeamAgentsConfig) -> TeamAgentsConfig {
        if let Some(b) = self.backend {
            match BackendKind::parse(&b) {
                Some(kind) => base.backend = kind,
                None => {
                    tracing::warn!(target = "team_agents", backend = %b, "Unknown backend; keeping default")
                }
            }
        }
        if let Some(ms) = self.request_timeout_ms {
            base.concord.messaging.request_timeout_ms = ms;
        }
        if let Some(members) = self.members {
            let members: Vec<MemberConfig> = members
                .into_iter()
                .filter(|m| !m.id.trim().is_empty())
                .map(|m| MemberConfig {
                    id: m.id,
                    role: m.role,
                    specialties: m.specialties,
                })
                .collect();
            if !members.is_empty() {
                base.members = members;
            }
        }
        base
    }
}
