//! Prompt templates for prediction and debate turns.

use std::collections::BTreeMap;

use arena::{EventRecord, Prediction, TurnContext, TurnRecord};

use crate::archetype::ArchetypeProfile;

/// Shared preamble for every prediction agent.
pub const SYSTEM_PROMPT_PREFIX: &str = "\
You are an independent AI research agent in a prediction battle.
Your goal is to forecast the outcome of a real-world event.

CORE RULES:
- Provide a clear YES or NO prediction
- Express probability as a float (0.0 - 1.0)
- Include 3-5 key claims with reliable sources
- Write a clear rationale (2-3 sentences)
- Be BRIEF and TO THE POINT
- No betting language
- Output MUST be valid JSON";

/// System prompt for an archetype: shared preamble plus its strategy block.
pub fn system_prompt(archetype: &ArchetypeProfile) -> String {
    format!(
        "{}\n\nARCHETYPE: {}\n{}\nEvidence preference: {}.\n{}",
        SYSTEM_PROMPT_PREFIX,
        archetype.display_name,
        archetype.strategy,
        archetype.evidence_preference,
        archetype.risk_posture
    )
}

/// User prompt for the prediction call.
pub fn prediction_prompt(event: &EventRecord, research_block: &str) -> String {
    format!(
        "TOPIC TO ANALYZE:\n{title}\n\n\
         DESCRIPTION:\n{description}\n\n\
         RESOLUTION RULES:\n{rules}\n\n\
         TARGET DATE: {date}\n\n\
         RESEARCH DATA:\n{research}\n\n\
         Respond with your analysis as JSON with fields: event_id (\"{event_id}\"), \
         prediction (\"YES\" or \"NO\"), probability (0.0-1.0), \
         key_facts (list of {{claim, source}}), rationale.\n\n\
         IMPORTANT:\n\
         - Be brief and to the point\n\
         - Include 3-5 key claims, each one clear sentence\n\
         - Rationale should explain your core reasoning",
        title = event.title,
        description = event.description,
        rules = event.resolution_rules,
        date = event.resolution_date,
        research = research_block,
        event_id = event.id,
    )
}

fn transcript_block(turns: &[TurnRecord]) -> String {
    if turns.is_empty() {
        return "This is the start of the discussion.".to_string();
    }
    turns
        .iter()
        .map(|t| match t.action {
            arena::TurnKind::Speak => format!("[round {}] {}: {}", t.round, t.agent_id, t.content),
            arena::TurnKind::Pass => format!("[round {}] {}: (passed)", t.round, t.agent_id),
            arena::TurnKind::Conclude => {
                format!("[round {}] {}: (concluded)", t.round, t.agent_id)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn predictions_block(predictions: &BTreeMap<String, Prediction>) -> String {
    predictions
        .values()
        .map(|p| {
            let claims = p
                .key_claims
                .iter()
                .map(|c| format!("  - {} ({})", c.claim, c.citation))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n{}", p.summary_line(), claims)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User prompt for a debate turn.
///
/// The context deliberately contains only the transcript and locked
/// predictions — an opponent's private research never appears here.
pub fn debate_turn_prompt(ctx: &TurnContext) -> String {
    format!(
        "DEBATE ROUND {round}\n\n\
         CURRENT DEBATE TRANSCRIPT:\n{transcript}\n\n\
         YOUR CURRENT PREDICTION:\n{own}\n\n\
         OTHER AGENTS' PREDICTIONS:\n{others}\n\n\
         Decide your turn. You may challenge a specific factual claim of an \
         opponent, rebut a challenge against you, pass, or conclude if you \
         have nothing left to contest. You may also revise your own \
         probability (and verdict) if an opponent's argument genuinely \
         moved you — revisions are recorded, never overwritten.\n\n\
         Respond as JSON with fields: action (\"speak\", \"pass\", or \
         \"conclude\"), statement (your challenge or rebuttal, required when \
         speaking), revised_probability (optional float), revised_verdict \
         (optional \"YES\"/\"NO\"), revised_rationale (optional).",
        round = ctx.round,
        transcript = transcript_block(&ctx.transcript),
        own = ctx.own.summary_line(),
        others = predictions_block(&ctx.opponents),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena::{KeyClaim, Verdict};

    fn event() -> EventRecord {
        EventRecord::new("e-1", "Will it ship?", "Resolves YES if shipped", "2026-12-31")
    }

    #[test]
    fn system_prompt_embeds_archetype() {
        let prompt = system_prompt(&ArchetypeProfile::constraint());
        assert!(prompt.contains("ARCHETYPE: Constraint"));
        assert!(prompt.contains("timeline realism"));
        assert!(prompt.starts_with(SYSTEM_PROMPT_PREFIX));
    }

    #[test]
    fn prediction_prompt_carries_event_and_research() {
        let prompt = prediction_prompt(&event(), "Source: x\nContent: y");
        assert!(prompt.contains("Will it ship?"));
        assert!(prompt.contains("Resolves YES if shipped"));
        assert!(prompt.contains("Source: x"));
        assert!(prompt.contains("\"e-1\""));
    }

    #[test]
    fn debate_prompt_shows_transcript_and_positions() {
        let own = Prediction::draft("e-1", "precision", Verdict::Yes, 0.8, vec![], "solid docs")
            .unwrap();
        let other = Prediction::draft(
            "e-1",
            "constraint",
            Verdict::No,
            0.7,
            vec![KeyClaim::new("regulators will stall", "https://example.com")],
            "timeline too tight",
        )
        .unwrap();
        let ctx = TurnContext {
            event_id: "e-1".to_string(),
            round: 2,
            transcript: vec![],
            own,
            opponents: [("constraint".to_string(), other)].into_iter().collect(),
        };
        let prompt = debate_turn_prompt(&ctx);
        assert!(prompt.contains("DEBATE ROUND 2"));
        assert!(prompt.contains("start of the discussion"));
        assert!(prompt.contains("precision: YES (80%)"));
        assert!(prompt.contains("regulators will stall"));
        assert!(prompt.contains("revised_probability"));
    }
}
