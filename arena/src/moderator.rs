//! Moderator policy — contradiction detection and speaker ordering.
//!
//! The moderator is deliberately algorithmic, not model-driven: given the
//! same latest predictions it always returns the same ordered invitee list,
//! which keeps debates reproducible under test.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::prediction::Prediction;
use crate::state::DebateState;

/// Kind of disagreement between two predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// One agent says YES, the other NO.
    OppositeVerdict,
    /// Same verdict, but probabilities diverge beyond the threshold.
    ProbabilityDivergence { gap: f64 },
}

impl std::fmt::Display for ContradictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OppositeVerdict => write!(f, "opposite_verdict"),
            Self::ProbabilityDivergence { gap } => {
                write!(f, "probability_divergence ({:.2})", gap)
            }
        }
    }
}

/// An unresolved pairwise disagreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// The two agents involved, in id order.
    pub agents: (String, String),
    /// What kind of disagreement.
    pub kind: ContradictionKind,
}

/// Tunables for contradiction detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratorConfig {
    /// Same-verdict probability gap above which two predictions count as
    /// contradictory. Must be in (0, 1).
    pub divergence_threshold: f64,
}

impl Default for ModeratorConfig {
    fn default() -> Self {
        Self {
            divergence_threshold: 0.25,
        }
    }
}

impl ModeratorConfig {
    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0 < self.divergence_threshold && self.divergence_threshold < 1.0) {
            return Err(format!(
                "divergence_threshold must be in (0, 1), got {}",
                self.divergence_threshold
            ));
        }
        Ok(())
    }
}

/// Decides who should speak next, from the latest predictions alone.
#[derive(Debug, Clone, Default)]
pub struct ModeratorPolicy {
    config: ModeratorConfig,
}

impl ModeratorPolicy {
    pub fn new(config: ModeratorConfig) -> Self {
        Self { config }
    }

    /// All pairwise contradictions among the given latest predictions.
    ///
    /// Pairs are visited in id order, so output order is deterministic.
    pub fn contradictions(
        &self,
        latest: &BTreeMap<String, Prediction>,
    ) -> Vec<Contradiction> {
        let agents: Vec<&String> = latest.keys().collect();
        let mut found = Vec::new();

        for (i, left) in agents.iter().enumerate() {
            for right in agents.iter().skip(i + 1) {
                let a = &latest[*left];
                let b = &latest[*right];

                let kind = if a.verdict != b.verdict {
                    Some(ContradictionKind::OppositeVerdict)
                } else {
                    let gap = (a.probability - b.probability).abs();
                    if gap > self.config.divergence_threshold {
                        Some(ContradictionKind::ProbabilityDivergence { gap })
                    } else {
                        None
                    }
                };

                if let Some(kind) = kind {
                    found.push(Contradiction {
                        agents: ((*left).clone(), (*right).clone()),
                        kind,
                    });
                }
            }
        }

        found
    }

    /// Ordered invitee list for the next turns.
    ///
    /// Agents party to contradictions come first, ranked by how many they are
    /// involved in (descending), tie-broken by agent id. Agents with no
    /// contradictions that have not yet spoken this round are appended last.
    /// Empty when no contradictions remain.
    pub fn next_speakers(
        &self,
        state: &DebateState,
        latest: &BTreeMap<String, Prediction>,
    ) -> Vec<String> {
        let contradictions = self.contradictions(latest);
        if contradictions.is_empty() {
            return Vec::new();
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for c in &contradictions {
            *counts.entry(c.agents.0.as_str()).or_default() += 1;
            *counts.entry(c.agents.1.as_str()).or_default() += 1;
        }

        let mut contested: Vec<(&str, usize)> =
            counts.iter().map(|(id, n)| (*id, *n)).collect();
        contested.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut speakers: Vec<String> =
            contested.into_iter().map(|(id, _)| id.to_string()).collect();

        // Uncontested agents get a voice too, after the contested ones,
        // unless they already spoke this round. BTreeMap keys keep this
        // deterministic.
        for agent in latest.keys() {
            if !counts.contains_key(agent.as_str()) && !state.spoke_this_round(agent) {
                speakers.push(agent.clone());
            }
        }

        speakers
    }
}
