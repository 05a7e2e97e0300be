//! The battle agent — one archetype bound to one provider backend.
//!
//! Per (agent, event) lifecycle:
//!
//! ```text
//! Idle → Researching → PredictionDrafted → PredictionLocked → Debating → Concluded
//!   │         │               │                   │              │
//!   └─────────┴───────────────┴───────── Failed ◄─┴──────────────┘
//! ```
//!
//! Research and prediction consume only (archetype, event) and the agent's
//! own private research context — never another agent's artifacts. Debate
//! turns see the shared transcript and locked predictions through
//! [`arena::TurnContext`], nothing more.

use std::sync::Arc;

use arena::{KeyClaim, Prediction, TurnAction, TurnContext, Verdict};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archetype::ArchetypeProfile;
use crate::prompts::{debate_turn_prompt, prediction_prompt, system_prompt};
use crate::provider::{
    call_with_retry, Capability, NormalizedResponse, ProviderAdapter, ProviderError,
    ProviderRequest, RetryPolicy,
};
use crate::research::{web_search_tool, ResearchClient, ResearchContext};

/// Bound on model-driven search iterations within one prediction call.
const MAX_TOOL_ITERATIONS: u32 = 3;

/// Lifecycle phase of an agent within one battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Researching,
    PredictionDrafted,
    PredictionLocked,
    Debating,
    Concluded,
    Failed,
}

impl AgentPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded | Self::Failed)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [AgentPhase] {
        match self {
            Self::Idle => &[Self::Researching, Self::Failed],
            Self::Researching => &[Self::PredictionDrafted, Self::Failed],
            Self::PredictionDrafted => &[Self::PredictionLocked, Self::Failed],
            Self::PredictionLocked => &[Self::Debating, Self::Concluded, Self::Failed],
            Self::Debating => &[Self::Concluded, Self::Failed],
            Self::Concluded | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Researching => write!(f, "researching"),
            Self::PredictionDrafted => write!(f, "prediction_drafted"),
            Self::PredictionLocked => write!(f, "prediction_locked"),
            Self::Debating => write!(f, "debating"),
            Self::Concluded => write!(f, "concluded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error for invalid agent phase transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid agent transition {from} → {to}")]
pub struct PhaseError {
    pub from: AgentPhase,
    pub to: AgentPhase,
}

/// Structured payload the backend must produce for a prediction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PredictionPayload {
    /// Event identifier, echoed back.
    pub event_id: String,
    /// "YES" or "NO".
    pub prediction: String,
    /// Probability of YES, 0.0 - 1.0.
    pub probability: f64,
    /// Claims with sources backing the call.
    pub key_facts: Vec<KeyFactPayload>,
    /// 2-3 sentence reasoning.
    pub rationale: String,
}

/// One claim/source pair in the prediction payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeyFactPayload {
    pub claim: String,
    pub source: String,
}

/// Structured payload the backend must produce for a debate turn.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TurnDecision {
    /// "speak", "pass", or "conclude".
    pub action: String,
    /// Challenge or rebuttal text; required when speaking.
    pub statement: Option<String>,
    /// New probability, when the agent revises its own prediction.
    pub revised_probability: Option<f64>,
    /// New verdict ("YES"/"NO"), when the agent flips.
    pub revised_verdict: Option<String>,
    /// Updated reasoning accompanying a revision.
    pub revised_rationale: Option<String>,
}

/// Errors from agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Backend failure after bounded retries — the agent is marked Failed
    /// and excluded from the rest of the battle.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The backend could not produce a schema-conforming prediction even
    /// after a corrective retry.
    #[error("malformed prediction from {agent}: {reason}")]
    MalformedPrediction { agent: String, reason: String },

    /// Operation attempted in the wrong lifecycle phase.
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// The battle was cancelled between atomic steps; in-flight results are
    /// discarded, not recorded as failures.
    #[error("cancelled between steps")]
    Cancelled,
}

/// One archetype bound to one provider backend.
pub struct BattleAgent {
    name: String,
    archetype: ArchetypeProfile,
    adapter: Arc<dyn ProviderAdapter>,
    retry: RetryPolicy,
    phase: AgentPhase,
}

impl BattleAgent {
    pub fn new(
        name: &str,
        archetype: ArchetypeProfile,
        adapter: Arc<dyn ProviderAdapter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            archetype,
            adapter,
            retry,
            phase: AgentPhase::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn archetype(&self) -> &ArchetypeProfile {
        &self.archetype
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Provider/model description for status output.
    pub fn backend_info(&self) -> String {
        format!(
            "{} ({}) {}",
            self.adapter.provider_name(),
            self.adapter.model(),
            self.adapter.capabilities()
        )
    }

    fn transition(&mut self, to: AgentPhase) -> Result<(), PhaseError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(PhaseError {
                from: self.phase,
                to,
            });
        }
        debug!(agent = %self.name, from = %self.phase, to = %to, "agent transition");
        self.phase = to;
        Ok(())
    }

    /// Mark the agent's prediction as locked in the ledger.
    pub fn mark_locked(&mut self) -> Result<(), PhaseError> {
        self.transition(AgentPhase::PredictionLocked)
    }

    /// Mark the agent concluded after the debate ends.
    pub fn mark_concluded(&mut self) -> Result<(), PhaseError> {
        self.transition(AgentPhase::Concluded)
    }

    /// Mark the agent failed; absorbs the phase check since failure can
    /// strike anywhere.
    pub fn mark_failed(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = AgentPhase::Failed;
        }
    }

    /// Gather strategy-specific evidence for the event.
    ///
    /// Pure function of (archetype, event) plus the external search backend;
    /// the result is this agent's private property. Search failures degrade
    /// to an empty context rather than failing the agent — prediction can
    /// still proceed on the backend's own knowledge.
    pub async fn research(
        &mut self,
        event: &arena::EventRecord,
        client: &dyn ResearchClient,
    ) -> Result<ResearchContext, AgentError> {
        self.transition(AgentPhase::Researching)?;
        let query = self.archetype.research_query(event);
        info!(agent = %self.name, query = %query, "researching");

        let hits = match client.search(&query, &self.archetype.id).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(agent = %self.name, error = %err, "research failed, continuing without evidence");
                Vec::new()
            }
        };
        Ok(ResearchContext::new(&self.name, &event.id, &query, hits))
    }

    /// Produce a draft prediction from the agent's own research.
    ///
    /// Uses the backend's structured-output path (native or degraded) and,
    /// when the backend can call tools, lets it issue bounded `web_search`
    /// calls for additional evidence. One corrective retry on a
    /// schema-violating reply; after that the agent is excluded with
    /// [`AgentError::MalformedPrediction`].
    pub async fn predict(
        &mut self,
        event: &arena::EventRecord,
        context: &ResearchContext,
        client: &dyn ResearchClient,
    ) -> Result<Prediction, AgentError> {
        let schema = serde_json::to_value(schema_for!(PredictionPayload)).unwrap_or_default();
        let system = system_prompt(&self.archetype);
        let mut research_block = context.as_prompt_block();

        let tools = if self.adapter.capabilities().supports(Capability::ToolCalling) {
            vec![web_search_tool()]
        } else {
            Vec::new()
        };

        let mut corrective: Option<String> = None;
        let mut tool_iterations = 0u32;

        loop {
            let mut prompt = prediction_prompt(event, &research_block);
            if let Some(note) = &corrective {
                prompt.push_str("\n\n");
                prompt.push_str(note);
            }
            let request = ProviderRequest::new(&system, &prompt)
                .with_tools(tools.clone())
                .with_schema(schema.clone());

            let response = call_with_retry(self.adapter.as_ref(), &request, &self.retry).await?;

            match response {
                NormalizedResponse::ToolInvocation { name, arguments }
                    if tool_iterations < MAX_TOOL_ITERATIONS =>
                {
                    tool_iterations += 1;
                    research_block.push_str("\n\n");
                    research_block.push_str(&self.run_tool(&name, &arguments, client).await);
                }
                NormalizedResponse::ToolInvocation { name, .. } => {
                    if corrective.is_some() {
                        return Err(AgentError::MalformedPrediction {
                            agent: self.name.clone(),
                            reason: "backend kept requesting tools past the iteration budget"
                                .to_string(),
                        });
                    }
                    warn!(agent = %self.name, tool = %name, "tool iteration budget exhausted");
                    corrective = Some(
                        "Do not call tools again. Respond with your final JSON analysis now."
                            .to_string(),
                    );
                }
                NormalizedResponse::Structured { json } => {
                    match self.payload_to_draft(event, &json) {
                        Ok(draft) => {
                            self.transition(AgentPhase::PredictionDrafted)?;
                            info!(
                                agent = %self.name,
                                verdict = %draft.verdict,
                                probability = draft.probability,
                                "prediction drafted"
                            );
                            return Ok(draft);
                        }
                        Err(reason) if corrective.is_none() => {
                            warn!(agent = %self.name, %reason, "schema violation, retrying once");
                            corrective = Some(format!(
                                "Your previous response was invalid ({}). Respond again with \
                                 only valid JSON matching the required fields.",
                                reason
                            ));
                        }
                        Err(reason) => {
                            return Err(AgentError::MalformedPrediction {
                                agent: self.name.clone(),
                                reason,
                            });
                        }
                    }
                }
                NormalizedResponse::Text { .. } if corrective.is_none() => {
                    corrective = Some(
                        "Your previous response was not JSON. Respond with only valid JSON."
                            .to_string(),
                    );
                }
                NormalizedResponse::Text { .. } => {
                    return Err(AgentError::MalformedPrediction {
                        agent: self.name.clone(),
                        reason: "backend returned prose instead of JSON".to_string(),
                    });
                }
            }
        }
    }

    async fn run_tool(
        &self,
        name: &str,
        arguments: &Value,
        client: &dyn ResearchClient,
    ) -> String {
        if name != "web_search" {
            return "Tool not available.".to_string();
        }
        let query = arguments["query"].as_str().unwrap_or_default();
        info!(agent = %self.name, query, "model-requested search");
        match client.search(query, &self.archetype.id).await {
            Ok(hits) if !hits.is_empty() => hits
                .iter()
                .map(|h| format!("Source: {}\nContent: {}", h.citation, h.snippet))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Ok(_) => "No results found.".to_string(),
            Err(err) => format!("Search failed: {}", err),
        }
    }

    fn payload_to_draft(
        &self,
        event: &arena::EventRecord,
        json: &Value,
    ) -> Result<Prediction, String> {
        let payload: PredictionPayload =
            serde_json::from_value(json.clone()).map_err(|e| e.to_string())?;
        let verdict: Verdict = payload.prediction.parse()?;
        let claims = payload
            .key_facts
            .iter()
            .map(|f| KeyClaim::new(&f.claim, &f.source))
            .collect();
        // The event id comes from the event, not the model's echo.
        Prediction::draft(
            &event.id,
            &self.name,
            verdict,
            payload.probability,
            claims,
            &payload.rationale,
        )
        .map_err(|e| e.to_string())
    }

    /// Decide a debate turn from the transcript and opponents' latest locked
    /// predictions.
    ///
    /// The decision itself comes from the backend; this method only enforces
    /// the contract: a revision is built from the agent's OWN chain head in
    /// the context, so it can never supersede another agent's record. An
    /// unusable decision degrades to Pass rather than failing the debate.
    pub async fn debate_turn(&mut self, ctx: &TurnContext) -> Result<TurnAction, AgentError> {
        if self.phase == AgentPhase::PredictionLocked {
            self.transition(AgentPhase::Debating)?;
        }

        let schema = serde_json::to_value(schema_for!(TurnDecision)).unwrap_or_default();
        let system = system_prompt(&self.archetype);
        let prompt = debate_turn_prompt(ctx);
        let request = ProviderRequest::new(&system, &prompt).with_schema(schema);

        let response = call_with_retry(self.adapter.as_ref(), &request, &self.retry).await?;
        let Some(json) = response.as_structured() else {
            warn!(agent = %self.name, "non-JSON turn decision, passing");
            return Ok(TurnAction::Pass);
        };

        let decision: TurnDecision = match serde_json::from_value(json.clone()) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(agent = %self.name, error = %err, "unparseable turn decision, passing");
                return Ok(TurnAction::Pass);
            }
        };

        Ok(self.decision_to_action(ctx, decision))
    }

    fn decision_to_action(&self, ctx: &TurnContext, decision: TurnDecision) -> TurnAction {
        match decision.action.trim().to_ascii_lowercase().as_str() {
            "speak" => {
                let content = decision.statement.unwrap_or_default();
                if content.trim().is_empty() {
                    warn!(agent = %self.name, "speak action without statement, passing");
                    return TurnAction::Pass;
                }
                let revision = self.build_revision(
                    ctx,
                    decision.revised_verdict.as_deref(),
                    decision.revised_probability,
                    decision.revised_rationale.as_deref(),
                );
                TurnAction::Speak { content, revision }
            }
            "conclude" => TurnAction::Conclude,
            "pass" => TurnAction::Pass,
            other => {
                warn!(agent = %self.name, action = other, "unknown turn action, passing");
                TurnAction::Pass
            }
        }
    }

    /// A revision only exists when the decision changes something, and it is
    /// always derived from the agent's own head in the context.
    fn build_revision(
        &self,
        ctx: &TurnContext,
        revised_verdict: Option<&str>,
        revised_probability: Option<f64>,
        revised_rationale: Option<&str>,
    ) -> Option<Prediction> {
        if revised_verdict.is_none() && revised_probability.is_none() {
            return None;
        }
        let verdict = match revised_verdict {
            Some(raw) => match raw.parse::<Verdict>() {
                Ok(v) => v,
                Err(err) => {
                    warn!(agent = %self.name, %err, "bad revised verdict, keeping revision out");
                    return None;
                }
            },
            None => ctx.own.verdict,
        };
        let probability = revised_probability.unwrap_or(ctx.own.probability);
        if verdict == ctx.own.verdict && (probability - ctx.own.probability).abs() < f64::EPSILON {
            return None;
        }
        let rationale = revised_rationale.unwrap_or(&ctx.own.rationale);
        match ctx
            .own
            .revise(verdict, probability, ctx.own.key_claims.clone(), rationale)
        {
            Ok(revision) => Some(revision),
            Err(err) => {
                warn!(agent = %self.name, error = %err, "invalid revision, keeping original");
                None
            }
        }
    }
}
