//! Battle agents — provider adapters, research agents, and the battle
//! runner for the AI prediction battle.
//!
//! This crate supplies everything that touches the network: the
//! capability-based provider normalization layer (OpenAI-compatible and
//! Gemini backends), the web-research client, the event-metadata source, the
//! archetype-driven agents, and the [`battle::BattleService`] that wires them
//! into the deterministic `arena` core.

pub mod agent;
pub mod archetype;
pub mod battle;
pub mod config;
pub mod event_source;
pub mod prompts;
pub mod provider;
pub mod research;

pub use agent::{AgentError, AgentPhase, BattleAgent, PredictionPayload, TurnDecision};
pub use archetype::ArchetypeProfile;
pub use battle::{
    AdapterFactory, AgentExclusion, BattleError, BattleReport, BattleService, ExclusionPhase,
    JsonFileSink,
};
pub use config::{AgentSpec, BattleConfig, CredentialProbe, ProviderKind};
pub use event_source::{EventSource, EventSourceError, GammaClient};
pub use provider::{
    call_with_retry, Capability, CapabilitySet, NormalizedResponse, ProviderAdapter,
    ProviderError, ProviderRequest, RetryPolicy, ToolSpec,
};
pub use research::{
    NoResearch, ResearchClient, ResearchContext, ResearchError, SearchHit, TavilySearch,
};
