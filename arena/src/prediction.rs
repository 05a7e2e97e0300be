//! Prediction records — verdicts, key claims, and the supersession chain.
//!
//! A prediction starts in `Draft` state, becomes immutable when `Locked` by
//! the ledger, and can only change afterwards by appending a new record that
//! `supersedes` the current chain head. Sequence numbers are strictly
//! increasing per (event, agent) chain, so the history is acyclic by
//! construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binary outcome of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Yes,
    No,
}

impl Verdict {
    /// The opposite verdict.
    pub fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            other => Err(format!("verdict must be YES or NO, got {:?}", other)),
        }
    }
}

/// A factual claim with its supporting citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyClaim {
    /// One clear sentence stating the claim.
    pub claim: String,
    /// URL or source name backing the claim.
    pub citation: String,
}

impl KeyClaim {
    pub fn new(claim: &str, citation: &str) -> Self {
        Self {
            claim: claim.to_string(),
            citation: citation.to_string(),
        }
    }
}

/// Lock state of a prediction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Produced by the agent, not yet committed to the ledger.
    Draft,
    /// Committed — every field is read-only from here on.
    Locked,
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// Error constructing a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionError {
    pub reason: String,
}

impl std::fmt::Display for PredictionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid prediction: {}", self.reason)
    }
}

impl std::error::Error for PredictionError {}

/// One agent's forecast for one event, at one point in the revision chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Event this prediction is about.
    pub event_id: String,
    /// Agent that produced it.
    pub agent_id: String,
    /// YES/NO call.
    pub verdict: Verdict,
    /// Probability of YES, in [0, 1].
    pub probability: f64,
    /// Claims with citations backing the call.
    pub key_claims: Vec<KeyClaim>,
    /// Short free-text reasoning.
    pub rationale: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Draft or Locked.
    pub lock_state: LockState,
    /// Position in the (event, agent) chain, starting at 0.
    pub sequence: u32,
    /// Sequence of the record this one revises, if any.
    pub supersedes: Option<u32>,
}

impl Prediction {
    /// Create the first draft of a chain.
    pub fn draft(
        event_id: &str,
        agent_id: &str,
        verdict: Verdict,
        probability: f64,
        key_claims: Vec<KeyClaim>,
        rationale: &str,
    ) -> Result<Self, PredictionError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(PredictionError {
                reason: format!("probability must be in [0, 1], got {}", probability),
            });
        }
        Ok(Self {
            event_id: event_id.to_string(),
            agent_id: agent_id.to_string(),
            verdict,
            probability,
            key_claims,
            rationale: rationale.to_string(),
            created_at: Utc::now(),
            lock_state: LockState::Draft,
            sequence: 0,
            supersedes: None,
        })
    }

    /// Create a draft revision superseding this record.
    ///
    /// Only the owner's own chain head should be revised; the ledger rejects
    /// anything else at lock time.
    pub fn revise(
        &self,
        verdict: Verdict,
        probability: f64,
        key_claims: Vec<KeyClaim>,
        rationale: &str,
    ) -> Result<Self, PredictionError> {
        let mut next = Self::draft(
            &self.event_id,
            &self.agent_id,
            verdict,
            probability,
            key_claims,
            rationale,
        )?;
        next.sequence = self.sequence + 1;
        next.supersedes = Some(self.sequence);
        Ok(next)
    }

    /// Whether the record is locked.
    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }

    /// Consume the draft and return the locked record. Ledger-internal.
    pub(crate) fn into_locked(mut self) -> Self {
        self.lock_state = LockState::Locked;
        self
    }

    /// Compact one-line summary for transcripts and logs.
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} ({:.0}%) — {}",
            self.agent_id,
            self.verdict,
            self.probability * 100.0,
            self.rationale
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Prediction {
        Prediction::draft(
            "e-1",
            "precision",
            Verdict::Yes,
            0.8,
            vec![KeyClaim::new("shipping confirmed", "https://example.com/a")],
            "Strong primary-source evidence",
        )
        .unwrap()
    }

    #[test]
    fn test_draft_defaults() {
        let p = draft();
        assert_eq!(p.lock_state, LockState::Draft);
        assert_eq!(p.sequence, 0);
        assert!(p.supersedes.is_none());
        assert!(!p.is_locked());
    }

    #[test]
    fn test_probability_out_of_range() {
        let err = Prediction::draft("e-1", "a", Verdict::No, 1.3, vec![], "r").unwrap_err();
        assert!(err.to_string().contains("probability"));
    }

    #[test]
    fn test_revise_links_chain() {
        let head = draft().into_locked();
        let rev = head.revise(Verdict::Yes, 0.6, vec![], "revised down").unwrap();
        assert_eq!(rev.sequence, 1);
        assert_eq!(rev.supersedes, Some(0));
        assert_eq!(rev.lock_state, LockState::Draft);
        assert_eq!(rev.agent_id, head.agent_id);
    }

    #[test]
    fn test_revise_rejects_bad_probability() {
        let head = draft();
        assert!(head.revise(Verdict::No, -0.1, vec![], "r").is_err());
    }

    #[test]
    fn test_verdict_parse_and_display() {
        assert_eq!("yes".parse::<Verdict>().unwrap(), Verdict::Yes);
        assert_eq!(" NO ".parse::<Verdict>().unwrap(), Verdict::No);
        assert!("maybe".parse::<Verdict>().is_err());
        assert_eq!(Verdict::Yes.to_string(), "YES");
        assert_eq!(Verdict::No.opposite(), Verdict::Yes);
    }

    #[test]
    fn test_verdict_serde_uppercase() {
        let json = serde_json::to_string(&Verdict::Yes).unwrap();
        assert_eq!(json, "\"YES\"");
        let parsed: Verdict = serde_json::from_str("\"NO\"").unwrap();
        assert_eq!(parsed, Verdict::No);
    }

    #[test]
    fn test_prediction_json_roundtrip() {
        let p = draft();
        let json = serde_json::to_string(&p).unwrap();
        let parsed: Prediction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_summary_line() {
        let line = draft().summary_line();
        assert!(line.contains("precision"));
        assert!(line.contains("YES"));
        assert!(line.contains("80%"));
    }
}
