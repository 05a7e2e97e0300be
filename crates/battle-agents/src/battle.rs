//! Battle service — research, lock, debate, report.
//!
//! Orchestrates one full battle for one event:
//!
//! 1. Probe credentials and instantiate agents; keyless agents are excluded
//!    up front, never failed at runtime.
//! 2. Run research + prediction per agent concurrently — agents share no
//!    mutable state, so parallelism here is free.
//! 3. Lock every surviving draft in the ledger; check quorum.
//! 4. Drive the arena scheduler, answering its turn requests from the live
//!    agents, strictly in moderator order.
//! 5. Emit a [`BattleReport`] with whatever partial results exist.
//!
//! A battle always completes: per-agent failures become exclusions with
//! reasons, and only systemic conditions (no agents at all) are errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use arena::{
    DebateOutcome, DebateScheduler, EventRecord, ModeratorPolicy, Prediction, PredictionLedger,
    SchedulerError, SinkError, TranscriptSink, TurnAction, TurnContext, TurnSource,
    TurnSourceError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentError, BattleAgent};
use crate::config::{BattleConfig, CredentialProbe, ProviderKind};
use crate::provider::{gemini::GeminiAdapter, openai_compat::OpenAiCompatAdapter, ProviderAdapter, ProviderError};
use crate::research::ResearchClient;

/// Why an agent sat out the battle (or part of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExclusion {
    /// The agent that was excluded.
    pub agent: String,
    /// Phase where the exclusion happened.
    pub phase: ExclusionPhase,
    /// Human-readable reason.
    pub reason: String,
}

/// Where in the battle an agent dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPhase {
    /// Missing credentials — agent never instantiated.
    Setup,
    /// Research/prediction failed or produced malformed output.
    Prediction,
    /// Failed while debating.
    Debate,
}

impl std::fmt::Display for ExclusionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Prediction => write!(f, "prediction"),
            Self::Debate => write!(f, "debate"),
        }
    }
}

/// Everything a battle produced, partial results included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleReport {
    /// The event that was battled.
    pub event: EventRecord,
    /// Debate outcome; absent when the debate never ran.
    pub outcome: Option<DebateOutcome>,
    /// Latest locked prediction per agent, debate or not.
    pub predictions: BTreeMap<String, Prediction>,
    /// Agents excluded along the way, with reasons.
    pub exclusions: Vec<AgentExclusion>,
    /// True when fewer than two agents locked — debate skipped.
    pub no_quorum: bool,
    /// True when the battle was cancelled between steps.
    pub cancelled: bool,
}

impl BattleReport {
    /// Compact status line.
    pub fn summary_line(&self) -> String {
        let debate = match &self.outcome {
            Some(outcome) => outcome.termination.to_string(),
            None if self.no_quorum => "no_quorum".to_string(),
            None if self.cancelled => "cancelled".to_string(),
            None => "skipped".to_string(),
        };
        format!(
            "[{}] {} predictions | {} excluded | event={}",
            debate,
            self.predictions.len(),
            self.exclusions.len(),
            self.event.id
        )
    }
}

/// Systemic battle failures. Per-agent problems never surface here.
#[derive(Debug, Error)]
pub enum BattleError {
    #[error("no agents available: every configured agent is missing credentials")]
    NoAgents,

    #[error("scheduler failure: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Answers the scheduler's turn requests from the live agents.
struct LiveTurnSource {
    agents: tokio::sync::Mutex<BTreeMap<String, BattleAgent>>,
}

#[async_trait]
impl TurnSource for LiveTurnSource {
    async fn take_turn(
        &self,
        agent_id: &str,
        ctx: &TurnContext,
    ) -> Result<TurnAction, TurnSourceError> {
        let mut agents = self.agents.lock().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| TurnSourceError::new(agent_id, "agent not instantiated"))?;
        match agent.debate_turn(ctx).await {
            Ok(action) => Ok(action),
            Err(err) => {
                agent.mark_failed();
                Err(TurnSourceError::new(agent_id, err.to_string()))
            }
        }
    }
}

/// Builds a provider adapter for (provider, model, key, timeout). Swappable
/// so tests can substitute scripted backends.
pub type AdapterFactory = Arc<
    dyn Fn(
            ProviderKind,
            &str,
            &str,
            std::time::Duration,
        ) -> Result<Arc<dyn ProviderAdapter>, ProviderError>
        + Send
        + Sync,
>;

fn default_adapter_factory() -> AdapterFactory {
    Arc::new(|kind: ProviderKind, model: &str, key: &str, timeout: std::time::Duration| {
        let adapter: Arc<dyn ProviderAdapter> = match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiCompatAdapter::openai(key, model, timeout)?),
            ProviderKind::Groq => Arc::new(OpenAiCompatAdapter::groq(key, model, timeout)?),
            ProviderKind::XAi => Arc::new(OpenAiCompatAdapter::xai(key, model, timeout)?),
            ProviderKind::Gemini => Arc::new(GeminiAdapter::new(key, model, timeout)?),
        };
        Ok(adapter)
    })
}

/// Runs battles end-to-end.
pub struct BattleService {
    config: BattleConfig,
    probe: CredentialProbe,
    research: Arc<dyn ResearchClient>,
    cancel: CancellationToken,
    adapter_factory: AdapterFactory,
}

impl std::fmt::Debug for BattleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BattleService")
            .field("config", &self.config)
            .field("probe", &self.probe)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl BattleService {
    pub fn new(
        config: BattleConfig,
        probe: CredentialProbe,
        research: Arc<dyn ResearchClient>,
    ) -> Result<Self, BattleError> {
        config.validate().map_err(BattleError::Config)?;
        Ok(Self {
            config,
            probe,
            research,
            cancel: CancellationToken::new(),
            adapter_factory: default_adapter_factory(),
        })
    }

    /// Substitute the adapter factory (scripted backends in tests).
    pub fn with_adapter_factory(mut self, factory: AdapterFactory) -> Self {
        self.adapter_factory = factory;
        self
    }

    /// Token for cancelling the battle between atomic steps. In-flight
    /// provider calls are never aborted; their results are discarded.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn build_adapter(
        &self,
        kind: ProviderKind,
        model: &str,
        key: &str,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        (self.adapter_factory)(kind, model, key, self.config.call_timeout())
    }

    /// Instantiate agents whose credentials are present; record the rest as
    /// setup exclusions.
    fn instantiate_agents(&self) -> (Vec<BattleAgent>, Vec<AgentExclusion>) {
        let mut agents = Vec::new();
        let mut exclusions = Vec::new();

        for spec in &self.config.agents {
            let Some(profile) = spec.profile() else {
                // validate() rejects this; belt and braces for hand-built configs.
                exclusions.push(AgentExclusion {
                    agent: spec.name.clone(),
                    phase: ExclusionPhase::Setup,
                    reason: format!("unknown archetype {:?}", spec.archetype),
                });
                continue;
            };
            let Some(key) = self.probe.credential(spec.provider) else {
                info!(agent = %spec.name, provider = %spec.provider, "credentials absent, agent not instantiated");
                exclusions.push(AgentExclusion {
                    agent: spec.name.clone(),
                    phase: ExclusionPhase::Setup,
                    reason: format!("{} credentials missing", spec.provider),
                });
                continue;
            };
            match self.build_adapter(spec.provider, spec.resolved_model(), &key) {
                Ok(adapter) => {
                    let agent = BattleAgent::new(
                        &spec.name,
                        profile,
                        adapter,
                        self.config.retry.clone(),
                    );
                    info!(agent = %spec.name, backend = %agent.backend_info(), "agent ready");
                    agents.push(agent);
                }
                Err(err) => {
                    exclusions.push(AgentExclusion {
                        agent: spec.name.clone(),
                        phase: ExclusionPhase::Setup,
                        reason: err.to_string(),
                    });
                }
            }
        }

        (agents, exclusions)
    }

    /// Run one full battle for the event.
    pub async fn run(&self, event: EventRecord) -> Result<BattleReport, BattleError> {
        self.run_inner(event, true).await
    }

    /// Research and lock predictions without debating.
    pub async fn predict_only(&self, event: EventRecord) -> Result<BattleReport, BattleError> {
        self.run_inner(event, false).await
    }

    async fn run_inner(&self, event: EventRecord, debate: bool) -> Result<BattleReport, BattleError> {
        let (agents, mut exclusions) = self.instantiate_agents();
        if agents.is_empty() {
            return Err(BattleError::NoAgents);
        }

        let ledger = Arc::new(PredictionLedger::new());
        let event = Arc::new(event);

        // Phase 1: independent research + prediction, concurrently. Each task
        // owns its agent and its private research context — nothing is shared.
        let mut tasks: JoinSet<(BattleAgent, Result<Prediction, AgentError>)> = JoinSet::new();
        for mut agent in agents {
            let event = Arc::clone(&event);
            let research = Arc::clone(&self.research);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let context = match agent.research(&event, research.as_ref()).await {
                    Ok(context) => context,
                    Err(err) => return (agent, Err(err)),
                };
                if cancel.is_cancelled() {
                    // Research result is discarded; predict never starts.
                    return (agent, Err(AgentError::Cancelled));
                }
                let draft = agent.predict(&event, &context, research.as_ref()).await;
                (agent, draft)
            });
        }

        let mut roster: BTreeMap<String, BattleAgent> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((mut agent, result)) = joined else {
                warn!("prediction task panicked; agent lost");
                continue;
            };
            let name = agent.name().to_string();
            match result {
                Ok(draft) => match ledger.lock(draft) {
                    Ok(locked) => {
                        info!(agent = %name, "{}", locked.summary_line());
                        if agent.mark_locked().is_ok() {
                            roster.insert(name, agent);
                        }
                    }
                    Err(err) => {
                        // Ledger violations in phase 1 are programming errors;
                        // surface them per agent but keep the battle alive.
                        agent.mark_failed();
                        exclusions.push(AgentExclusion {
                            agent: name,
                            phase: ExclusionPhase::Prediction,
                            reason: err.to_string(),
                        });
                    }
                },
                Err(AgentError::Cancelled) => {
                    // Discarded by request; not an exclusion.
                }
                Err(err) => {
                    agent.mark_failed();
                    warn!(agent = %name, error = %err, "agent excluded from battle");
                    exclusions.push(AgentExclusion {
                        agent: name,
                        phase: ExclusionPhase::Prediction,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(BattleReport {
                event: (*event).clone(),
                outcome: None,
                predictions: self.locked_predictions(&ledger, &event.id, &roster),
                exclusions,
                no_quorum: false,
                cancelled: true,
            });
        }

        if !debate {
            return Ok(BattleReport {
                event: (*event).clone(),
                outcome: None,
                predictions: self.locked_predictions(&ledger, &event.id, &roster),
                exclusions,
                no_quorum: false,
                cancelled: false,
            });
        }

        // Phase 2: quorum gate. Predictions are still reported without one.
        if roster.len() < self.config.scheduler.quorum {
            warn!(
                locked = roster.len(),
                required = self.config.scheduler.quorum,
                "no quorum, debate skipped"
            );
            return Ok(BattleReport {
                event: (*event).clone(),
                outcome: None,
                predictions: self.locked_predictions(&ledger, &event.id, &roster),
                exclusions,
                no_quorum: true,
                cancelled: false,
            });
        }

        // Phase 3: the debate.
        let participant_ids: Vec<String> = roster.keys().cloned().collect();
        let mut scheduler = DebateScheduler::new(
            &event.id,
            participant_ids.iter().cloned(),
            Arc::clone(&ledger),
            ModeratorPolicy::new(self.config.moderator.clone()),
            self.config.scheduler.clone(),
        );
        scheduler.begin()?;

        let source = LiveTurnSource {
            agents: tokio::sync::Mutex::new(roster),
        };
        let outcome = scheduler.run(&source).await?;

        let mut roster = source.agents.into_inner();
        for (agent_id, reason) in &outcome.failed_agents {
            exclusions.push(AgentExclusion {
                agent: agent_id.clone(),
                phase: ExclusionPhase::Debate,
                reason: reason.clone(),
            });
        }
        for agent in roster.values_mut() {
            if !agent.phase().is_terminal() {
                let _ = agent.mark_concluded();
            }
        }

        info!("{}", outcome.summary_line());
        Ok(BattleReport {
            event: (*event).clone(),
            predictions: self.locked_predictions(&ledger, &event.id, &roster),
            outcome: Some(outcome),
            exclusions,
            no_quorum: false,
            cancelled: false,
        })
    }

    fn locked_predictions(
        &self,
        ledger: &PredictionLedger,
        event_id: &str,
        roster: &BTreeMap<String, BattleAgent>,
    ) -> BTreeMap<String, Prediction> {
        let ids: Vec<String> = roster.keys().cloned().collect();
        ledger.latest_for(event_id, &ids)
    }
}

/// Transcript sink that pretty-prints the outcome as JSON to a file.
pub struct JsonFileSink {
    path: std::path::PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TranscriptSink for JsonFileSink {
    fn publish(&self, outcome: &DebateOutcome) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(outcome).map_err(|e| SinkError {
            reason: e.to_string(),
        })?;
        std::fs::write(&self.path, json).map_err(|e| SinkError {
            reason: e.to_string(),
        })
    }
}
