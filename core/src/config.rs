use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::context::RankerConfig;
use crate::llm::LlmClientConfig;
use crate::{ConcordError, Result};

/// Top-level configuration for an `AgentNetwork` and its agents
#[derive(Clone, Debug, Default)]
pub struct ConcordConfig {
    pub context: ContextConfig,
    pub ranking: RankerConfig,
    pub messaging: MessagingConfig,
    pub llm: LlmClientConfig,
}

/// Context store housekeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    /// Period of the background expiry sweep; zero disables it
    pub sweep_interval_ms: u64,
    /// Lifetime of SYSTEM entries recorded for broadcasts; `None` keeps them forever
    pub broadcast_ttl_ms: Option<u64>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: std::env::var("CONCORD_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60_000),
            broadcast_ttl_ms: std::env::var("CONCORD_BROADCAST_TTL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok()),
        }
    }
}

impl ContextConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

/// Request/response behaviour of the messaging layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Deadline applied by `send_request`; zero means wait indefinitely
    pub request_timeout_ms: u64,
    /// How many finished request states stay observable
    pub state_history_limit: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: std::env::var("CONCORD_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            state_history_limit: 1024,
        }
    }
}

impl MessagingConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl ConcordConfig {
    /// Load configuration from a TOML file (path via CONCORD_CONFIG or ./concord.toml),
    /// overlaying values onto env-driven defaults. Read or parse failures fall back to
    /// the defaults with a warning.
    pub fn load() -> Self {
        let path = std::env::var("CONCORD_CONFIG").unwrap_or_else(|_| "concord.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "config", path = %path, "No TOML config found; using defaults/env");
            return Self::default();
        }
        match Self::load_from(p) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(target = "config", error = %e, "Failed to load TOML; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let t = toml::from_str::<ConcordToml>(s).map_err(|e| ConcordError::Config(e.to_string()))?;
        Ok(t.overlay(Self::default()))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct ConcordToml {
    context: Option<ContextToml>,
    ranking: Option<RankingToml>,
    messaging: Option<MessagingToml>,
    llm: Option<LlmToml>,
}

impl ConcordToml {
    fn overlay(self, mut base: ConcordConfig) -> ConcordConfig {
        if let Some(c) = self.context {
            c.apply(&mut base.context);
        }
        if let Some(r) = self.ranking {
            r.apply(&mut base.ranking);
        }
        if let Some(m) = self.messaging {
            m.apply(&mut base.messaging);
        }
        if let Some(l) = self.llm {
            l.apply(&mut base.llm);
        }
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ContextToml {
    sweep_interval_ms: Option<u64>,
    broadcast_ttl_ms: Option<u64>,
}

impl ContextToml {
    fn apply(self, c: &mut ContextConfig) {
        if let Some(v) = self.sweep_interval_ms {
            c.sweep_interval_ms = v;
        }
        if let Some(v) = self.broadcast_ttl_ms {
            c.broadcast_ttl_ms = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RankingToml {
    critical_weight: Option<f64>,
    high_weight: Option<f64>,
    medium_weight: Option<f64>,
    low_weight: Option<f64>,
    recency_weight: Option<f64>,
    half_life_ms: Option<i64>,
    tag_weight: Option<f64>,
    max_entries: Option<usize>,
    max_tokens: Option<usize>,
}

impl RankingToml {
    fn apply(self, r: &mut RankerConfig) {
        if let Some(v) = self.critical_weight {
            r.critical_weight = v;
        }
        if let Some(v) = self.high_weight {
            r.high_weight = v;
        }
        if let Some(v) = self.medium_weight {
            r.medium_weight = v;
        }
        if let Some(v) = self.low_weight {
            r.low_weight = v;
        }
        if let Some(v) = self.recency_weight {
            r.recency_weight = v;
        }
        if let Some(v) = self.half_life_ms {
            r.half_life_ms = v;
        }
        if let Some(v) = self.tag_weight {
            r.tag_weight = v;
        }
        if let Some(v) = self.max_entries {
            r.max_entries = v;
        }
        if let Some(v) = self.max_tokens {
            r.max_tokens = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MessagingToml {
    request_timeout_ms: Option<u64>,
    state_history_limit: Option<usize>,
}

impl MessagingToml {
    fn apply(self, m: &mut MessagingConfig) {
        if let Some(v) = self.request_timeout_ms {
            m.request_timeout_ms = v;
        }
        if let Some(v) = self.state_history_limit {
            m.state_history_limit = v;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LlmToml {
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    request_timeout_ms: Option<u64>,
    temperature: Option<f32>,
    max_input_tokens: Option<usize>,
    max_output_tokens: Option<usize>,
    system_prompt: Option<String>,
}

impl LlmToml {
    fn apply(self, l: &mut LlmClientConfig) {
        if let Some(v) = self.base_url {
            l.base_url = v;
        }
        if let Some(v) = self.model {
            l.model = v;
        }
        if let Some(v) = self.api_key {
            if !v.is_empty() {
                l.api_key = Some(v);
            }
        }
        if let Some(v) = self.request_timeout_ms {
            l.request_timeout_ms = v;
        }
        if let Some(v) = self.temperature {
            l.temperature = v;
        }
        if let Some(v) = self.max_input_tokens {
            l.max_input_tokens = v;
        }
        if let Some(v) = self.max_output_tokens {
            l.max_output_tokens = v;
        }
        if let Some(v) = self.system_prompt {
            l.system_prompt = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_keeps_unset_defaults() {
        let cfg = ConcordConfig::from_toml_str(
            r#"
            [ranking]
            half_life_ms = 60000
            max_entries = 5

            [messaging]
            request_timeout_ms = 0

            [llm]
            model = "local-model"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.ranking.half_life_ms, 60_000);
        assert_eq!(cfg.ranking.max_entries, 5);
        assert_eq!(cfg.ranking.critical_weight, 1.0);
        assert!(cfg.messaging.request_timeout().is_none());
        assert_eq!(cfg.llm.model, "local-model");
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = ConcordConfig::from_toml_str("[ranking\nx=").unwrap_err();
        assert!(matches!(err, ConcordError::Config(_)));
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let cfg = ConcordConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.ranking, RankerConfig::default());
        assert_eq!(cfg.messaging.state_history_limit, 1024);
    }
}
