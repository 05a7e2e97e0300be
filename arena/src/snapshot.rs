//! Debate snapshots — serialization, integrity validation, and the
//! transcript sink boundary.
//!
//! A snapshot captures everything needed to reconstruct a debate exactly:
//! the debate state (transcript, active set, round counter, terminal flag)
//! plus the full supersession chain per agent. Reloading a snapshot must
//! reproduce an identical `DebateState` and latest-prediction set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::PredictionLedger;
use crate::prediction::{LockState, Prediction};
use crate::scheduler::{DebateOutcome, TerminationReason};
use crate::state::DebateState;

/// A complete debate snapshot for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// The debate state at snapshot time.
    pub state: DebateState,
    /// Full prediction chain per agent, oldest first.
    pub chains: BTreeMap<String, Vec<Prediction>>,
    /// Termination reason, once the debate has ended.
    pub termination: Option<TerminationReason>,
}

impl DebateSnapshot {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Snapshot a live debate.
    pub fn capture(
        state: &DebateState,
        ledger: &PredictionLedger,
        termination: Option<TerminationReason>,
    ) -> Self {
        let chains = state
            .active_agents
            .iter()
            .map(|agent| (agent.clone(), ledger.chain(&state.event_id, agent)))
            .collect();
        Self {
            version: Self::CURRENT_VERSION,
            state: state.clone(),
            chains,
            termination,
        }
    }

    /// Snapshot a finished debate from its outcome.
    pub fn from_outcome(outcome: &DebateOutcome, ledger: &PredictionLedger) -> Self {
        let mut snapshot = Self::capture(&outcome.state, ledger, Some(outcome.termination.clone()));
        // Failed agents left the active set but their chains still matter.
        for agent in outcome.failed_agents.keys() {
            let chain = ledger.chain(&outcome.event_id, agent);
            if !chain.is_empty() {
                snapshot.chains.insert(agent.clone(), chain);
            }
        }
        snapshot
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Deserialize from JSON, rejecting newer schema versions.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| SnapshotError::DeserializeFailed {
                reason: e.to_string(),
            })?;
        if snapshot.version > Self::CURRENT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    /// Latest prediction per agent, from the stored chains.
    pub fn latest_predictions(&self) -> BTreeMap<String, Prediction> {
        self.chains
            .iter()
            .filter_map(|(agent, chain)| chain.last().map(|p| (agent.clone(), p.clone())))
            .collect()
    }

    /// Rebuild a ledger holding exactly the snapshotted chains.
    pub fn rebuild_ledger(&self) -> Result<PredictionLedger, SnapshotError> {
        let ledger = PredictionLedger::new();
        for chain in self.chains.values() {
            for record in chain {
                let mut draft = record.clone();
                draft.lock_state = LockState::Draft;
                ledger
                    .lock(draft)
                    .map_err(|e| SnapshotError::IntegrityCheckFailed {
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(ledger)
    }
}

/// Error during snapshot operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Serialization failed.
    SerializeFailed { reason: String },
    /// Deserialization failed.
    DeserializeFailed { reason: String },
    /// Schema version mismatch.
    VersionMismatch { expected: u32, found: u32 },
    /// Integrity check failed on restore.
    IntegrityCheckFailed { reason: String },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializeFailed { reason } => write!(f, "serialize failed: {}", reason),
            Self::DeserializeFailed { reason } => write!(f, "deserialize failed: {}", reason),
            Self::VersionMismatch { expected, found } => {
                write!(f, "version mismatch: expected {}, found {}", expected, found)
            }
            Self::IntegrityCheckFailed { reason } => {
                write!(f, "integrity check failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Snapshot is valid and can be resumed.
    Valid,
    /// Minor issues, still loadable.
    Recoverable { warnings: Vec<String> },
    /// Corrupted — must not be used.
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    /// Whether the snapshot is safe to load.
    pub fn can_load(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}

/// Validate a snapshot's internal consistency before loading it.
pub fn validate_snapshot(snapshot: &DebateSnapshot) -> IntegrityStatus {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if snapshot.version > DebateSnapshot::CURRENT_VERSION {
        errors.push(format!(
            "version {} > current {}",
            snapshot.version,
            DebateSnapshot::CURRENT_VERSION
        ));
    }

    // No turn may come from a round beyond the counter.
    for turn in &snapshot.state.turns {
        if turn.round > snapshot.state.round {
            errors.push(format!(
                "turn by {} in round {} exceeds round counter {}",
                turn.agent_id, turn.round, snapshot.state.round
            ));
        }
    }

    // Terminal flag and termination reason must agree.
    match (snapshot.state.terminal, &snapshot.termination) {
        (true, None) => warnings.push("terminal state with no termination reason".to_string()),
        (false, Some(reason)) => errors.push(format!(
            "non-terminal state carries termination reason {}",
            reason
        )),
        _ => {}
    }

    // Every chain must be well-formed: locked records, sequences 0..n,
    // each link superseding its predecessor.
    for (agent, chain) in &snapshot.chains {
        for (idx, record) in chain.iter().enumerate() {
            if !record.is_locked() {
                errors.push(format!("{} chain holds an unlocked record", agent));
            }
            if record.sequence != idx as u32 {
                errors.push(format!(
                    "{} chain sequence {} at position {}",
                    agent, record.sequence, idx
                ));
            }
            let expected = if idx == 0 { None } else { Some(idx as u32 - 1) };
            if record.supersedes != expected {
                errors.push(format!(
                    "{} chain link {} supersedes {:?}, expected {:?}",
                    agent, idx, record.supersedes, expected
                ));
            }
            if record.agent_id != *agent {
                errors.push(format!(
                    "{} chain holds a record owned by {}",
                    agent, record.agent_id
                ));
            }
        }
    }

    // Every active agent should have a chain.
    for agent in &snapshot.state.active_agents {
        if !snapshot.chains.contains_key(agent) {
            warnings.push(format!("active agent {} has no chain", agent));
        }
    }

    if !errors.is_empty() {
        IntegrityStatus::Corrupted { errors }
    } else if !warnings.is_empty() {
        IntegrityStatus::Recoverable { warnings }
    } else {
        IntegrityStatus::Valid
    }
}

/// Load a snapshot from JSON, validating integrity.
pub fn restore(json: &str) -> Result<(DebateSnapshot, IntegrityStatus), SnapshotError> {
    let snapshot = DebateSnapshot::from_json(json)?;
    let status = validate_snapshot(&snapshot);
    if let IntegrityStatus::Corrupted { ref errors } = status {
        return Err(SnapshotError::IntegrityCheckFailed {
            reason: errors.join("; "),
        });
    }
    Ok((snapshot, status))
}

/// Receives a finished debate. Rendering (text/JSON/audio) is the sink's
/// concern, not the core's.
pub trait TranscriptSink: Send + Sync {
    fn publish(&self, outcome: &DebateOutcome) -> Result<(), SinkError>;
}

/// Error from a transcript sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError {
    pub reason: String,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transcript sink failed: {}", self.reason)
    }
}

impl std::error::Error for SinkError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::Verdict;
    use crate::state::TurnAction;
    use std::sync::Arc;

    fn draft(agent: &str, verdict: Verdict, probability: f64) -> Prediction {
        Prediction::draft("e-1", agent, verdict, probability, vec![], "because").unwrap()
    }

    fn populated() -> (DebateState, Arc<PredictionLedger>) {
        let ledger = Arc::new(PredictionLedger::new());
        let head = ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        ledger.lock(draft("b", Verdict::No, 0.7)).unwrap();
        let rev = head.revise(Verdict::Yes, 0.6, vec![], "revised").unwrap();
        ledger.lock(rev).unwrap();

        let mut state = DebateState::new("e-1", ["a".to_string(), "b".to_string()]);
        state = state.advanced(state.active_agents.clone());
        state.record_turn(
            "a",
            &TurnAction::Speak {
                content: "challenge".to_string(),
                revision: None,
            },
        );
        state.record_turn("b", &TurnAction::Conclude);
        (state, ledger)
    }

    #[test]
    fn test_capture_and_roundtrip() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let json = snapshot.to_json().unwrap();
        let restored = DebateSnapshot::from_json(&json).unwrap();

        assert_eq!(restored.state, snapshot.state);
        assert_eq!(restored.chains, snapshot.chains);
        assert_eq!(restored.state.turns.len(), 2);
        assert_eq!(restored.chains["a"].len(), 2);
        assert_eq!(restored.chains["b"].len(), 1);
    }

    #[test]
    fn test_roundtrip_preserves_latest_predictions() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let json = snapshot.to_json().unwrap();
        let restored = DebateSnapshot::from_json(&json).unwrap();

        let latest = restored.latest_predictions();
        assert_eq!(latest["a"].probability, 0.6);
        assert_eq!(latest["a"].sequence, 1);
        assert_eq!(latest["b"].verdict, Verdict::No);
    }

    #[test]
    fn test_rebuild_ledger_matches() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let rebuilt = snapshot.rebuild_ledger().unwrap();

        assert_eq!(rebuilt.chain("e-1", "a"), ledger.chain("e-1", "a"));
        assert_eq!(rebuilt.chain("e-1", "b"), ledger.chain("e-1", "b"));
        assert_eq!(
            rebuilt.latest("e-1", "a").unwrap().probability,
            ledger.latest("e-1", "a").unwrap().probability
        );
    }

    #[test]
    fn test_validate_valid() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let status = validate_snapshot(&snapshot);
        assert_eq!(status, IntegrityStatus::Valid);
        assert!(status.can_load());
    }

    #[test]
    fn test_validate_broken_chain() {
        let (state, ledger) = populated();
        let mut snapshot = DebateSnapshot::capture(&state, &ledger, None);
        snapshot.chains.get_mut("a").unwrap()[1].supersedes = Some(5);
        let status = validate_snapshot(&snapshot);
        assert!(matches!(status, IntegrityStatus::Corrupted { .. }));
        assert!(!status.can_load());
    }

    #[test]
    fn test_validate_turn_beyond_round() {
        let (mut state, ledger) = populated();
        state.turns[0].round = 9;
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        assert!(matches!(
            validate_snapshot(&snapshot),
            IntegrityStatus::Corrupted { .. }
        ));
    }

    #[test]
    fn test_validate_termination_mismatch() {
        let (state, ledger) = populated();
        let snapshot =
            DebateSnapshot::capture(&state, &ledger, Some(TerminationReason::AllConcluded));
        // Non-terminal state with a termination reason is corrupt.
        assert!(matches!(
            validate_snapshot(&snapshot),
            IntegrityStatus::Corrupted { .. }
        ));
    }

    #[test]
    fn test_validate_missing_chain_recoverable() {
        let (state, ledger) = populated();
        let mut snapshot = DebateSnapshot::capture(&state, &ledger, None);
        snapshot.chains.remove("b");
        let status = validate_snapshot(&snapshot);
        assert!(matches!(status, IntegrityStatus::Recoverable { .. }));
        assert!(status.can_load());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let mut value: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        value["version"] = serde_json::json!(99);
        let json = serde_json::to_string(&value).unwrap();
        let err = DebateSnapshot::from_json(&json).unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { .. }));
    }

    #[test]
    fn test_restore_rejects_corrupted() {
        let (state, ledger) = populated();
        let mut snapshot = DebateSnapshot::capture(&state, &ledger, None);
        snapshot.chains.get_mut("a").unwrap()[0].sequence = 7;
        let json = snapshot.to_json().unwrap();
        let err = restore(&json).unwrap_err();
        assert!(matches!(err, SnapshotError::IntegrityCheckFailed { .. }));
    }

    #[test]
    fn test_restore_valid() {
        let (state, ledger) = populated();
        let snapshot = DebateSnapshot::capture(&state, &ledger, None);
        let json = snapshot.to_json().unwrap();
        let (restored, status) = restore(&json).unwrap();
        assert!(status.can_load());
        assert_eq!(restored.state.event_id, "e-1");
    }

    #[test]
    fn test_bad_json_rejected() {
        let err = DebateSnapshot::from_json("not json").unwrap_err();
        assert!(matches!(err, SnapshotError::DeserializeFailed { .. }));
    }

    #[test]
    fn test_snapshot_error_display() {
        let err = SnapshotError::VersionMismatch {
            expected: 1,
            found: 2,
        };
        assert!(err.to_string().contains("version mismatch"));
        let err = SnapshotError::IntegrityCheckFailed {
            reason: "broken".to_string(),
        };
        assert!(err.to_string().contains("integrity"));
    }
}
