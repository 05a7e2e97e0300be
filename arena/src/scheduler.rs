//! Debate scheduler — the turn-taking state machine.
//!
//! Drives rounds once every participant has locked a prediction: consults the
//! moderator policy for invitees, polls each invited agent strictly in policy
//! order through an injected [`TurnSource`], records turns, applies
//! prediction revisions through the ledger, and evaluates termination.
//!
//! # Round Flow
//!
//! ```text
//! AwaitingAllLocked → RoundStart → Inviting → CollectingTurns → RoundEnd
//!         │                                                        │
//!         │                              ┌── rounds left ──────────┤
//!         │                              ▼                         ▼
//!         └─ quorum/lock gate        RoundStart               Terminated
//! ```
//!
//! Turn collection is strictly sequential within a round — each turn may
//! depend on the transcript state left by the previous one. Agent failures
//! are absorbed: a failing agent is dropped from the next round's active set
//! and the debate continues.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, PredictionLedger, DEFAULT_QUORUM};
use crate::moderator::ModeratorPolicy;
use crate::prediction::Prediction;
use crate::state::{DebateState, SchedulerPhase, TransitionError, TurnAction, TurnRecord};

/// What an invited agent sees when asked for a turn.
///
/// Deliberately excludes every agent's private research context — only the
/// transcript and locked/latest predictions cross the isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    /// Event under debate.
    pub event_id: String,
    /// Current round (1-indexed).
    pub round: u32,
    /// Full transcript so far.
    pub transcript: Vec<TurnRecord>,
    /// The invited agent's own latest prediction (its chain head).
    pub own: Prediction,
    /// Opponents' latest predictions, keyed by agent id.
    pub opponents: BTreeMap<String, Prediction>,
}

/// Error from a turn source. Treated as that agent's failure, not the
/// debate's.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("turn source failed for {agent}: {reason}")]
pub struct TurnSourceError {
    pub agent: String,
    pub reason: String,
}

impl TurnSourceError {
    pub fn new(agent: &str, reason: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            reason: reason.into(),
        }
    }
}

/// Produces turn decisions for invited agents.
///
/// The real implementation asks a model backend; tests inject a scripted
/// source. The scheduler only fixes the contract: input shape, output shape,
/// and the rule that a revision may only supersede the agent's own record.
#[async_trait]
pub trait TurnSource: Send + Sync {
    async fn take_turn(
        &self,
        agent_id: &str,
        ctx: &TurnContext,
    ) -> Result<TurnAction, TurnSourceError>;
}

/// Why a debate terminated. Every variant is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every active agent concluded within the same round.
    AllConcluded,
    /// Configured round cap reached.
    MaxRoundsReached,
    /// No contradictions left to debate.
    NoContradictions,
    /// Too few agents remain active to continue.
    QuorumLost,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllConcluded => write!(f, "all_concluded"),
            Self::MaxRoundsReached => write!(f, "max_rounds_reached"),
            Self::NoContradictions => write!(f, "no_contradictions"),
            Self::QuorumLost => write!(f, "quorum_lost"),
        }
    }
}

/// Scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum rounds before forced termination.
    pub max_rounds: u32,
    /// Minimum locked agents required to start.
    pub quorum: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            quorum: DEFAULT_QUORUM,
        }
    }
}

impl SchedulerConfig {
    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("max_rounds must be > 0".to_string());
        }
        if self.quorum < 2 {
            return Err("quorum must be at least 2".to_string());
        }
        Ok(())
    }
}

/// Error from the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("not all agents have locked predictions for {event}: missing {missing:?}")]
    NotAllLocked { event: String, missing: Vec<String> },

    #[error("no quorum: {locked} agent(s) locked, {required} required")]
    NoQuorum { locked: usize, required: usize },

    #[error("ledger violation: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("debate already terminated")]
    AlreadyTerminated,

    #[error("debate has not started; call begin() first")]
    NotStarted,
}

/// Final product of a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateOutcome {
    /// Event under debate.
    pub event_id: String,
    /// Why the debate ended.
    pub termination: TerminationReason,
    /// Total rounds executed.
    pub rounds_completed: u32,
    /// The full ordered transcript.
    pub turns: Vec<TurnRecord>,
    /// Latest prediction per agent at termination.
    pub final_predictions: BTreeMap<String, Prediction>,
    /// Agents that failed mid-debate, with reasons.
    pub failed_agents: BTreeMap<String, String>,
    /// The terminal debate state snapshot.
    pub state: DebateState,
}

impl DebateOutcome {
    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} rounds | {} turns | {} agents | event={}",
            self.termination,
            self.rounds_completed,
            self.turns.len(),
            self.final_predictions.len(),
            self.event_id
        )
    }
}

/// The turn-taking state machine for one debate.
pub struct DebateScheduler {
    phase: SchedulerPhase,
    state: DebateState,
    ledger: Arc<PredictionLedger>,
    policy: ModeratorPolicy,
    config: SchedulerConfig,
    failed: BTreeMap<String, String>,
    termination: Option<TerminationReason>,
}

impl DebateScheduler {
    /// Create a scheduler for an event and its participant set.
    pub fn new(
        event_id: &str,
        agents: impl IntoIterator<Item = String>,
        ledger: Arc<PredictionLedger>,
        policy: ModeratorPolicy,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            phase: SchedulerPhase::AwaitingAllLocked,
            state: DebateState::new(event_id, agents),
            ledger,
            policy,
            config,
            failed: BTreeMap::new(),
            termination: None,
        }
    }

    /// Current scheduler phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Current debate state.
    pub fn state(&self) -> &DebateState {
        &self.state
    }

    fn transition(&mut self, to: SchedulerPhase) -> Result<(), SchedulerError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            }
            .into());
        }
        debug!(from = %self.phase, to = %to, "scheduler transition");
        self.phase = to;
        Ok(())
    }

    /// Gate the debate on the ledger: every participant must be locked and
    /// the quorum must hold. Transitions AwaitingAllLocked → RoundStart.
    pub fn begin(&mut self) -> Result<(), SchedulerError> {
        if self.phase != SchedulerPhase::AwaitingAllLocked {
            return Err(SchedulerError::AlreadyTerminated);
        }

        let agents: Vec<String> = self.state.active_agents.iter().cloned().collect();
        let locked = self.ledger.locked_count(&self.state.event_id, &agents);
        if locked < self.config.quorum {
            return Err(SchedulerError::NoQuorum {
                locked,
                required: self.config.quorum,
            });
        }
        if !self.ledger.all_locked(&self.state.event_id, &agents) {
            let missing: Vec<String> = agents
                .into_iter()
                .filter(|a| self.ledger.latest(&self.state.event_id, a).is_none())
                .collect();
            return Err(SchedulerError::NotAllLocked {
                event: self.state.event_id.clone(),
                missing,
            });
        }

        info!(event = %self.state.event_id, agents = self.state.active_agents.len(), "all predictions locked, debate opening");
        self.transition(SchedulerPhase::RoundStart)
    }

    /// Run rounds until termination and return the outcome.
    pub async fn run(
        &mut self,
        source: &dyn TurnSource,
    ) -> Result<DebateOutcome, SchedulerError> {
        if self.phase == SchedulerPhase::AwaitingAllLocked {
            return Err(SchedulerError::NotStarted);
        }

        while self.phase != SchedulerPhase::Terminated {
            self.run_round(source).await?;
        }

        Ok(self.outcome().expect("terminated scheduler has an outcome"))
    }

    /// Execute a single round: RoundStart → Inviting → CollectingTurns →
    /// RoundEnd → (RoundStart | Terminated).
    async fn run_round(&mut self, source: &dyn TurnSource) -> Result<(), SchedulerError> {
        if self.phase != SchedulerPhase::RoundStart {
            return Err(SchedulerError::AlreadyTerminated);
        }

        // Functional round open: next state carries the surviving active set.
        self.state = self.state.advanced(self.state.active_agents.clone());
        let round = self.state.round;

        self.transition(SchedulerPhase::Inviting)?;

        let active: Vec<String> = self.state.active_agents.iter().cloned().collect();
        let latest = self.ledger.latest_for(&self.state.event_id, &active);
        let invitees = self.policy.next_speakers(&self.state, &latest);
        info!(round, invitees = ?invitees, "round opened");

        if invitees.is_empty() {
            // The policy returns an empty set only when no contradictions
            // remain, and a turnless round cannot create one — the empty set
            // is a fixed point, so the debate is over.
            self.transition(SchedulerPhase::RoundEnd)?;
            return self.terminate(TerminationReason::NoContradictions);
        }

        self.transition(SchedulerPhase::CollectingTurns)?;

        let mut concluded: BTreeSet<String> = BTreeSet::new();
        let mut dropped: BTreeSet<String> = BTreeSet::new();

        for agent in &invitees {
            let Some(own) = self.ledger.latest(&self.state.event_id, agent) else {
                // Defensive: the begin() gate makes this unreachable.
                continue;
            };
            let opponents: BTreeMap<String, Prediction> = self
                .ledger
                .latest_for(&self.state.event_id, &active)
                .into_iter()
                .filter(|(id, _)| id != agent)
                .collect();
            let ctx = TurnContext {
                event_id: self.state.event_id.clone(),
                round,
                transcript: self.state.turns.clone(),
                own,
                opponents,
            };

            match source.take_turn(agent, &ctx).await {
                Ok(action) => {
                    if let TurnAction::Speak {
                        revision: Some(revision),
                        ..
                    } = &action
                    {
                        self.apply_revision(agent, revision.clone())?;
                    }
                    if matches!(action, TurnAction::Conclude) {
                        concluded.insert(agent.clone());
                    }
                    self.state.record_turn(agent, &action);
                    debug!(round, agent = %agent, action = %action.kind(), "turn recorded");
                }
                Err(err) => {
                    // Local failure: absorb, log, and drop the agent from the
                    // next round. The debate continues without it.
                    warn!(round, agent = %agent, error = %err, "agent failed mid-debate, excluding");
                    self.failed.insert(agent.clone(), err.reason.clone());
                    dropped.insert(agent.clone());
                }
            }
        }

        self.transition(SchedulerPhase::RoundEnd)?;

        // Termination checks, in order.
        let survivors: BTreeSet<String> = self
            .state
            .active_agents
            .iter()
            .filter(|a| !dropped.contains(*a))
            .cloned()
            .collect();

        if !concluded.is_empty() && survivors.iter().all(|a| concluded.contains(a)) {
            return self.terminate(TerminationReason::AllConcluded);
        }
        if round >= self.config.max_rounds {
            // Hitting the cap is a normal outcome, not an error.
            return self.terminate(TerminationReason::MaxRoundsReached);
        }
        if survivors.len() < self.config.quorum {
            return self.terminate(TerminationReason::QuorumLost);
        }

        self.close_round(&dropped)
    }

    /// A Speak revision must supersede the speaker's own chain head.
    fn apply_revision(
        &mut self,
        agent: &str,
        revision: Prediction,
    ) -> Result<(), SchedulerError> {
        if revision.agent_id != agent || revision.event_id != self.state.event_id {
            let head = self
                .ledger
                .latest(&self.state.event_id, agent)
                .map(|p| p.sequence);
            return Err(LedgerError::InvalidSupersede {
                event: self.state.event_id.clone(),
                agent: agent.to_string(),
                expected: head,
                expected_seq: head.map(|s| s + 1).unwrap_or(0),
                found: revision.supersedes,
                found_seq: revision.sequence,
            }
            .into());
        }
        let locked = self.ledger.lock(revision)?;
        info!(agent = %agent, sequence = locked.sequence, probability = locked.probability, "prediction revised");
        Ok(())
    }

    fn close_round(&mut self, dropped: &BTreeSet<String>) -> Result<(), SchedulerError> {
        if !dropped.is_empty() {
            let survivors: BTreeSet<String> = self
                .state
                .active_agents
                .iter()
                .filter(|a| !dropped.contains(*a))
                .cloned()
                .collect();
            // Keep round/turns; only the active set shrinks for the next round.
            self.state = DebateState {
                active_agents: survivors,
                ..self.state.clone()
            };
        }
        self.transition(SchedulerPhase::RoundStart)
    }

    fn terminate(&mut self, reason: TerminationReason) -> Result<(), SchedulerError> {
        info!(reason = %reason, round = self.state.round, "debate terminated");
        self.termination = Some(reason);
        self.state = self.state.terminated();
        self.transition(SchedulerPhase::Terminated)
    }

    /// The debate outcome; `None` until terminated.
    pub fn outcome(&self) -> Option<DebateOutcome> {
        let termination = self.termination.clone()?;
        let active: Vec<String> = self.state.active_agents.iter().cloned().collect();
        Some(DebateOutcome {
            event_id: self.state.event_id.clone(),
            termination,
            rounds_completed: self.state.round,
            turns: self.state.turns.clone(),
            final_predictions: self.ledger.latest_for(&self.state.event_id, &active),
            failed_agents: self.failed.clone(),
            state: self.state.clone(),
        })
    }
}
