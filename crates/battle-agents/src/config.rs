//! Battle configuration — provider selection, agent roster, and tunables.
//!
//! Providers are chosen by explicit configuration, never by sniffing key
//! prefixes: each agent spec names a [`ProviderKind`], and the credential
//! probe only answers whether that provider's key is present.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (e.g. `BATTLE_MAX_ROUNDS`)
//! 2. Values in this struct
//! 3. Built-in defaults

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use arena::{ModeratorConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};

use crate::archetype::ArchetypeProfile;
use crate::provider::RetryPolicy;

/// Environment-variable names for overrides.
const ENV_MAX_ROUNDS: &str = "BATTLE_MAX_ROUNDS";
const ENV_DIVERGENCE_THRESHOLD: &str = "BATTLE_DIVERGENCE_THRESHOLD";
const ENV_CALL_TIMEOUT_SECS: &str = "BATTLE_CALL_TIMEOUT_SECS";

/// Default per-call timeout for provider round-trips.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;
/// Default number of research results per query.
const DEFAULT_RESEARCH_MAX_RESULTS: usize = 3;

/// Supported model backends. Selected at construction time via
/// configuration — never inferred from secret contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Groq,
    XAi,
    Gemini,
}

impl ProviderKind {
    /// Environment variable holding this provider's API key.
    pub fn key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::XAi => "XAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Default model for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::XAi => "grok-2-latest",
            Self::Gemini => "gemini-2.0-flash",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Groq => write!(f, "groq"),
            Self::XAi => write!(f, "xai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// One agent in the roster: a name, an archetype, and a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent id used in the ledger and transcript.
    pub name: String,
    /// Built-in archetype id ("precision", "early-signal", "constraint").
    pub archetype: String,
    /// Which backend drives this agent.
    pub provider: ProviderKind,
    /// Model override; provider default when absent.
    pub model: Option<String>,
}

impl AgentSpec {
    /// The model this spec resolves to.
    pub fn resolved_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// The archetype profile this spec names.
    pub fn profile(&self) -> Option<ArchetypeProfile> {
        ArchetypeProfile::builtin(&self.archetype)
    }
}

/// Top-level configuration for a battle run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleConfig {
    /// The agent roster.
    pub agents: Vec<AgentSpec>,
    /// Moderator tunables.
    pub moderator: ModeratorConfig,
    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,
    /// Provider retry policy.
    pub retry: RetryPolicy,
    /// Per provider-call timeout in seconds.
    pub call_timeout_secs: u64,
    /// Research results per query.
    pub research_max_results: usize,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            agents: vec![
                AgentSpec {
                    name: "precision".to_string(),
                    archetype: "precision".to_string(),
                    provider: ProviderKind::OpenAi,
                    model: None,
                },
                AgentSpec {
                    name: "early-signal".to_string(),
                    archetype: "early-signal".to_string(),
                    provider: ProviderKind::XAi,
                    model: None,
                },
                AgentSpec {
                    name: "constraint".to_string(),
                    archetype: "constraint".to_string(),
                    provider: ProviderKind::Gemini,
                    model: None,
                },
            ],
            moderator: ModeratorConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            research_max_results: DEFAULT_RESEARCH_MAX_RESULTS,
        }
    }
}

impl BattleConfig {
    /// Build from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(rounds) = env::var(ENV_MAX_ROUNDS).ok().and_then(|v| v.parse().ok()) {
            config.scheduler.max_rounds = rounds;
        }
        if let Some(threshold) = env::var(ENV_DIVERGENCE_THRESHOLD)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.moderator.divergence_threshold = threshold;
        }
        if let Some(timeout) = env::var(ENV_CALL_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.call_timeout_secs = timeout;
        }
        config
    }

    /// The per-call timeout as a duration.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Validate all sub-configs.
    pub fn validate(&self) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("at least one agent must be configured".to_string());
        }
        let mut names: Vec<&str> = self.agents.iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.agents.len() {
            return Err("agent names must be unique".to_string());
        }
        for agent in &self.agents {
            if agent.profile().is_none() {
                return Err(format!(
                    "agent {} names unknown archetype {:?}",
                    agent.name, agent.archetype
                ));
            }
        }
        self.moderator.validate()?;
        self.scheduler.validate()?;
        if self.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Answers whether a provider's credentials are present.
///
/// Reads the environment by default; tests inject a fixed map. Placeholder
/// values (too short, or left at "your_...") count as absent.
#[derive(Debug, Clone, Default)]
pub struct CredentialProbe {
    overrides: Option<HashMap<ProviderKind, String>>,
}

impl CredentialProbe {
    /// Probe the process environment.
    pub fn from_env() -> Self {
        Self { overrides: None }
    }

    /// Probe a fixed credential map (tests, embedded runs).
    pub fn from_map(map: HashMap<ProviderKind, String>) -> Self {
        Self {
            overrides: Some(map),
        }
    }

    fn plausible(key: &str) -> bool {
        key.len() > 20 && !key.starts_with("your_")
    }

    /// The provider's key, when present and plausible.
    pub fn credential(&self, kind: ProviderKind) -> Option<String> {
        let raw = match &self.overrides {
            Some(map) => map.get(&kind).cloned(),
            None => env::var(kind.key_env()).ok(),
        }?;
        Self::plausible(&raw).then_some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        BattleConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn duplicate_agent_names_rejected() {
        let mut config = BattleConfig::default();
        config.agents[1].name = config.agents[0].name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_archetype_rejected() {
        let mut config = BattleConfig::default();
        config.agents[0].archetype = "gambler".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_roster_rejected() {
        let config = BattleConfig {
            agents: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = BattleConfig {
            call_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolved_model_prefers_override() {
        let spec = AgentSpec {
            name: "a".to_string(),
            archetype: "precision".to_string(),
            provider: ProviderKind::OpenAi,
            model: Some("gpt-4o-mini".to_string()),
        };
        assert_eq!(spec.resolved_model(), "gpt-4o-mini");

        let spec = AgentSpec { model: None, ..spec };
        assert_eq!(spec.resolved_model(), "gpt-4o");
    }

    #[test]
    fn provider_kind_metadata() {
        assert_eq!(ProviderKind::Gemini.key_env(), "GEMINI_API_KEY");
        assert_eq!(ProviderKind::XAi.default_model(), "grok-2-latest");
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }

    #[test]
    fn provider_kind_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::Groq).unwrap(),
            "\"groq\""
        );
        let parsed: ProviderKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(parsed, ProviderKind::Gemini);
    }

    #[test]
    fn probe_rejects_placeholders() {
        let probe = CredentialProbe::from_map(
            [
                (ProviderKind::OpenAi, "sk-a-long-enough-real-key".to_string()),
                (ProviderKind::Gemini, "your_gemini_key_here_padded".to_string()),
                (ProviderKind::XAi, "short".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        assert!(probe.credential(ProviderKind::OpenAi).is_some());
        assert!(probe.credential(ProviderKind::Gemini).is_none());
        assert!(probe.credential(ProviderKind::XAi).is_none());
        assert!(probe.credential(ProviderKind::Groq).is_none());
    }
}
