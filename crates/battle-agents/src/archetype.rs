//! Agent archetypes — research strategy, evidence preference, and risk
//! posture as data.
//!
//! One generic agent type consumes these profiles; there is no per-archetype
//! subclassing. New archetypes are configuration, not code.

use arena::EventRecord;
use serde::{Deserialize, Serialize};

/// A named research/risk strategy assigned to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeProfile {
    /// Stable identifier ("precision", "early-signal", "constraint").
    pub id: String,
    /// Human-facing name.
    pub display_name: String,
    /// One-paragraph description of how this archetype reasons.
    pub strategy: String,
    /// What kind of evidence it weighs most.
    pub evidence_preference: String,
    /// How aggressively it assigns probabilities.
    pub risk_posture: String,
    /// Search-query suffix appended to the event title.
    pub query_suffix: String,
}

impl ArchetypeProfile {
    /// Precision-oriented: primary sources, conservative probabilities.
    pub fn precision() -> Self {
        Self {
            id: "precision".to_string(),
            display_name: "Precision".to_string(),
            strategy: "Focus on factual accuracy and high-quality evidence. \
                       Prefer official documentation, company press releases, and primary sources."
                .to_string(),
            evidence_preference: "official documentation and primary sources".to_string(),
            risk_posture:
                "Be conservative with probabilities unless evidence is overwhelming.".to_string(),
            query_suffix: "official sources documentation".to_string(),
        }
    }

    /// Early-signal oriented: sentiment, leaks, extreme probabilities on
    /// strong shifts.
    pub fn early_signal() -> Self {
        Self {
            id: "early-signal".to_string(),
            display_name: "Early Signal".to_string(),
            strategy: "Focus on detecting emerging signals before they become mainstream. \
                       Monitor social sentiment, leaks, and expert commentary."
                .to_string(),
            evidence_preference: "social sentiment, leaks, and expert commentary".to_string(),
            risk_posture:
                "Assign more extreme probabilities when a strong early shift is detected."
                    .to_string(),
            query_suffix: "rumors leaks social sentiment trends".to_string(),
        }
    }

    /// Constraint-oriented: feasibility, precedent, moderate risk.
    pub fn constraint() -> Self {
        Self {
            id: "constraint".to_string(),
            display_name: "Constraint".to_string(),
            strategy: "Focus on timeline realism and execution constraints. \
                       Analyze historical precedents, technical feasibility, and regulatory hurdles."
                .to_string(),
            evidence_preference: "historical precedents and feasibility analyses".to_string(),
            risk_posture: "Maintain a moderate risk posture, grounding predictions in what is \
                           realistically possible."
                .to_string(),
            query_suffix: "historical constraints feasibility".to_string(),
        }
    }

    /// All built-in archetypes.
    pub fn builtins() -> Vec<Self> {
        vec![Self::precision(), Self::early_signal(), Self::constraint()]
    }

    /// Look up a built-in archetype by id.
    pub fn builtin(id: &str) -> Option<Self> {
        Self::builtins().into_iter().find(|a| a.id == id)
    }

    /// The strategy-specific research query for an event. Pure function of
    /// (archetype, event) — no cross-agent input ever feeds this.
    pub fn research_query(&self, event: &EventRecord) -> String {
        format!("{} {}", event.title, self.query_suffix)
    }
}

impl std::fmt::Display for ArchetypeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup() {
        assert!(ArchetypeProfile::builtin("precision").is_some());
        assert!(ArchetypeProfile::builtin("early-signal").is_some());
        assert!(ArchetypeProfile::builtin("constraint").is_some());
        assert!(ArchetypeProfile::builtin("gambler").is_none());
    }

    #[test]
    fn research_queries_differ_per_archetype() {
        let event = EventRecord::new("e-1", "Will GPT-6 launch in 2026?", "rules", "2026-12-31");
        let queries: Vec<String> = ArchetypeProfile::builtins()
            .iter()
            .map(|a| a.research_query(&event))
            .collect();
        assert!(queries[0].contains("official sources"));
        assert!(queries[1].contains("sentiment"));
        assert!(queries[2].contains("feasibility"));
        // All distinct, all derived only from the event.
        assert_ne!(queries[0], queries[1]);
        assert_ne!(queries[1], queries[2]);
        for q in &queries {
            assert!(q.starts_with("Will GPT-6 launch in 2026?"));
        }
    }

    #[test]
    fn display_format() {
        let a = ArchetypeProfile::precision();
        assert_eq!(a.to_string(), "Precision (precision)");
    }

    #[test]
    fn profile_json_roundtrip() {
        let a = ArchetypeProfile::early_signal();
        let json = serde_json::to_string(&a).unwrap();
        let parsed: ArchetypeProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, a);
    }
}
