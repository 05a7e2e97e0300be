//! Debate state — scheduler phases, turn records, and the per-debate state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prediction::Prediction;

/// Phase of the debate scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// Waiting for every participant to lock a prediction.
    AwaitingAllLocked,
    /// A new round is being opened.
    RoundStart,
    /// Moderator policy produced the invitee list.
    Inviting,
    /// Invited agents are being polled, one at a time.
    CollectingTurns,
    /// Round finished; termination conditions are evaluated.
    RoundEnd,
    /// Debate over — transcript and final predictions are available.
    Terminated,
}

impl SchedulerPhase {
    /// Whether this is the terminal phase.
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [SchedulerPhase] {
        match self {
            Self::AwaitingAllLocked => &[Self::RoundStart],
            Self::RoundStart => &[Self::Inviting],
            Self::Inviting => &[Self::CollectingTurns, Self::RoundEnd],
            Self::CollectingTurns => &[Self::RoundEnd],
            Self::RoundEnd => &[Self::RoundStart, Self::Terminated],
            Self::Terminated => &[],
        }
    }
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingAllLocked => write!(f, "awaiting_all_locked"),
            Self::RoundStart => write!(f, "round_start"),
            Self::Inviting => write!(f, "inviting"),
            Self::CollectingTurns => write!(f, "collecting_turns"),
            Self::RoundEnd => write!(f, "round_end"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Error for invalid scheduler phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SchedulerPhase,
    pub to: SchedulerPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// What an agent decided to do with its turn.
///
/// Only a `Speak` action may carry a prediction revision, and that revision
/// must supersede the agent's own chain head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TurnAction {
    /// Challenge or rebuttal, optionally revising the agent's own prediction.
    Speak {
        content: String,
        revision: Option<Prediction>,
    },
    /// Decline the turn without conceding.
    Pass,
    /// The agent has nothing left to contest.
    Conclude,
}

impl TurnAction {
    /// The action kind, for transcript records.
    pub fn kind(&self) -> TurnKind {
        match self {
            Self::Speak { .. } => TurnKind::Speak,
            Self::Pass => TurnKind::Pass,
            Self::Conclude => TurnKind::Conclude,
        }
    }
}

/// Kind of action taken in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Speak,
    Pass,
    Conclude,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Speak => write!(f, "speak"),
            Self::Pass => write!(f, "pass"),
            Self::Conclude => write!(f, "conclude"),
        }
    }
}

/// One agent's action within a round. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Round number (1-indexed).
    pub round: u32,
    /// Speaking agent.
    pub agent_id: String,
    /// What the agent did.
    pub action: TurnKind,
    /// Challenge/rebuttal text; empty for pass and conclude.
    pub content: String,
    /// When the turn was recorded.
    pub spoke_at: DateTime<Utc>,
}

/// State of one debate, owned by the scheduler for its lifetime.
///
/// The active-agent set is never mutated in place across rounds: each new
/// round is opened by constructing the next state via [`DebateState::advanced`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    /// Unique debate identifier.
    pub id: String,
    /// Event under debate.
    pub event_id: String,
    /// Ordered transcript.
    pub turns: Vec<TurnRecord>,
    /// Agents still participating.
    pub active_agents: BTreeSet<String>,
    /// Current round (0 until the first round opens).
    pub round: u32,
    /// Set when the debate has terminated.
    pub terminal: bool,
}

impl DebateState {
    /// Create the initial state for a debate.
    pub fn new(event_id: &str, agents: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            turns: Vec::new(),
            active_agents: agents.into_iter().collect(),
            round: 0,
            terminal: false,
        }
    }

    /// Open the next round with a (possibly reduced) active set.
    pub fn advanced(&self, active_agents: BTreeSet<String>) -> Self {
        Self {
            round: self.round + 1,
            active_agents,
            ..self.clone()
        }
    }

    /// Close the debate.
    pub fn terminated(&self) -> Self {
        Self {
            terminal: true,
            ..self.clone()
        }
    }

    /// Append a turn to the transcript.
    pub fn record_turn(&mut self, agent_id: &str, action: &TurnAction) {
        let content = match action {
            TurnAction::Speak { content, .. } => content.clone(),
            TurnAction::Pass | TurnAction::Conclude => String::new(),
        };
        self.turns.push(TurnRecord {
            round: self.round,
            agent_id: agent_id.to_string(),
            action: action.kind(),
            content,
            spoke_at: Utc::now(),
        });
    }

    /// Turns taken in the given round, in order.
    pub fn turns_in_round(&self, round: u32) -> Vec<&TurnRecord> {
        self.turns.iter().filter(|t| t.round == round).collect()
    }

    /// Whether the agent took a Speak turn in the current round.
    pub fn spoke_this_round(&self, agent_id: &str) -> bool {
        self.turns
            .iter()
            .any(|t| t.round == self.round && t.agent_id == agent_id && t.action == TurnKind::Speak)
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[round {}] {} turns | {} active | event={}",
            self.round,
            self.turns.len(),
            self.active_agents.len(),
            self.event_id
        )
    }
}
