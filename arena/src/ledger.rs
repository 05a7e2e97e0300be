//! Prediction ledger — append-only lock store with per-agent supersession chains.
//!
//! One chain per (event, agent). Locking is the gate between independent
//! research and debate: `all_locked` must hold for every participant before
//! the scheduler starts a round.
//!
//! Concurrency contract: each chain sits behind its own mutex inside a
//! map-level read/write lock, so readers never block writers of *other*
//! agents, and writers for the *same* agent serialize.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::prediction::{LockState, Prediction};

/// Minimum number of locked agents for a debate to proceed.
pub const DEFAULT_QUORUM: usize = 2;

/// Ledger contract violations. These are ordering/programming errors and are
/// surfaced immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("({event}, {agent}) already holds a locked prediction at sequence {head}; revisions must supersede the head")]
    AlreadyLocked {
        event: String,
        agent: String,
        head: u32,
    },

    #[error("invalid supersession for ({event}, {agent}): expected predecessor {expected:?} at sequence {expected_seq}, found supersedes={found:?} sequence={found_seq}")]
    InvalidSupersede {
        event: String,
        agent: String,
        expected: Option<u32>,
        expected_seq: u32,
        found: Option<u32>,
        found_seq: u32,
    },

    #[error("prediction for ({event}, {agent}) is already {state}; only drafts can be locked")]
    NotADraft {
        event: String,
        agent: String,
        state: LockState,
    },
}

type ChainKey = (String, String);
type Chain = Arc<Mutex<Vec<Prediction>>>;

/// Append-only store of locked predictions keyed by (event, agent).
#[derive(Default)]
pub struct PredictionLedger {
    chains: RwLock<HashMap<ChainKey, Chain>>,
}

impl PredictionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain_for(&self, event: &str, agent: &str) -> Chain {
        let key = (event.to_string(), agent.to_string());
        if let Some(chain) = self.chains.read().expect("ledger map poisoned").get(&key) {
            return Arc::clone(chain);
        }
        let mut map = self.chains.write().expect("ledger map poisoned");
        Arc::clone(map.entry(key).or_default())
    }

    /// Lock a draft prediction, appending it to its (event, agent) chain.
    ///
    /// The first lock must be a chain root (sequence 0, no predecessor).
    /// Later locks must supersede the current head exactly. Returns the
    /// locked record.
    pub fn lock(&self, prediction: Prediction) -> Result<Prediction, LedgerError> {
        if prediction.lock_state != LockState::Draft {
            return Err(LedgerError::NotADraft {
                event: prediction.event_id.clone(),
                agent: prediction.agent_id.clone(),
                state: prediction.lock_state,
            });
        }

        let chain = self.chain_for(&prediction.event_id, &prediction.agent_id);
        let mut records = chain.lock().expect("ledger chain poisoned");

        match records.last() {
            None => {
                if prediction.sequence != 0 || prediction.supersedes.is_some() {
                    return Err(LedgerError::InvalidSupersede {
                        event: prediction.event_id.clone(),
                        agent: prediction.agent_id.clone(),
                        expected: None,
                        expected_seq: 0,
                        found: prediction.supersedes,
                        found_seq: prediction.sequence,
                    });
                }
            }
            Some(head) => {
                if prediction.supersedes.is_none() {
                    return Err(LedgerError::AlreadyLocked {
                        event: prediction.event_id.clone(),
                        agent: prediction.agent_id.clone(),
                        head: head.sequence,
                    });
                }
                if prediction.supersedes != Some(head.sequence)
                    || prediction.sequence != head.sequence + 1
                {
                    return Err(LedgerError::InvalidSupersede {
                        event: prediction.event_id.clone(),
                        agent: prediction.agent_id.clone(),
                        expected: Some(head.sequence),
                        expected_seq: head.sequence + 1,
                        found: prediction.supersedes,
                        found_seq: prediction.sequence,
                    });
                }
            }
        }

        let locked = prediction.into_locked();
        records.push(locked.clone());
        Ok(locked)
    }

    /// Latest record in the (event, agent) chain, if any.
    pub fn latest(&self, event: &str, agent: &str) -> Option<Prediction> {
        let key = (event.to_string(), agent.to_string());
        let map = self.chains.read().expect("ledger map poisoned");
        let chain = map.get(&key)?;
        let records = chain.lock().expect("ledger chain poisoned");
        records.last().cloned()
    }

    /// Full supersession chain for (event, agent), oldest first.
    pub fn chain(&self, event: &str, agent: &str) -> Vec<Prediction> {
        let key = (event.to_string(), agent.to_string());
        let map = self.chains.read().expect("ledger map poisoned");
        match map.get(&key) {
            Some(chain) => chain.lock().expect("ledger chain poisoned").clone(),
            None => Vec::new(),
        }
    }

    /// Whether every listed agent holds at least one locked record for the
    /// event. Gates the transition from independent research to debate.
    pub fn all_locked<S: AsRef<str>>(&self, event: &str, agents: &[S]) -> bool {
        agents
            .iter()
            .all(|agent| self.latest(event, agent.as_ref()).is_some())
    }

    /// Number of listed agents that hold a locked record for the event.
    pub fn locked_count<S: AsRef<str>>(&self, event: &str, agents: &[S]) -> usize {
        agents
            .iter()
            .filter(|agent| self.latest(event, agent.as_ref()).is_some())
            .count()
    }

    /// Latest prediction per agent, for every listed agent that has one.
    pub fn latest_for<S: AsRef<str>>(
        &self,
        event: &str,
        agents: &[S],
    ) -> BTreeMap<String, Prediction> {
        agents
            .iter()
            .filter_map(|agent| {
                self.latest(event, agent.as_ref())
                    .map(|p| (agent.as_ref().to_string(), p))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::Verdict;

    fn draft(agent: &str, verdict: Verdict, probability: f64) -> Prediction {
        Prediction::draft("e-1", agent, verdict, probability, vec![], "because").unwrap()
    }

    #[test]
    fn test_lock_root() {
        let ledger = PredictionLedger::new();
        let locked = ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        assert!(locked.is_locked());
        assert_eq!(ledger.latest("e-1", "a").unwrap().sequence, 0);
    }

    #[test]
    fn test_double_root_lock_rejected() {
        let ledger = PredictionLedger::new();
        ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        let err = ledger.lock(draft("a", Verdict::No, 0.4)).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyLocked { head: 0, .. }));
    }

    #[test]
    fn test_supersede_head() {
        let ledger = PredictionLedger::new();
        let head = ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        let rev = head.revise(Verdict::Yes, 0.6, vec![], "revised").unwrap();
        let locked = ledger.lock(rev).unwrap();
        assert_eq!(locked.sequence, 1);
        assert_eq!(ledger.latest("e-1", "a").unwrap().probability, 0.6);
        assert_eq!(ledger.chain("e-1", "a").len(), 2);
    }

    #[test]
    fn test_stale_supersede_rejected() {
        let ledger = PredictionLedger::new();
        let root = ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        let first = root.revise(Verdict::Yes, 0.7, vec![], "r1").unwrap();
        ledger.lock(first).unwrap();
        // Second revision built from the stale root, not the new head.
        let stale = root.revise(Verdict::Yes, 0.5, vec![], "r2").unwrap();
        let err = ledger.lock(stale).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidSupersede {
                expected: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn test_root_with_predecessor_rejected() {
        let ledger = PredictionLedger::new();
        let mut p = draft("a", Verdict::Yes, 0.8);
        p.sequence = 1;
        p.supersedes = Some(0);
        let err = ledger.lock(p).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSupersede { expected: None, .. }));
    }

    #[test]
    fn test_locked_record_rejected_as_input() {
        let ledger = PredictionLedger::new();
        let locked = ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        let err = ledger.lock(locked).unwrap_err();
        assert!(matches!(err, LedgerError::NotADraft { .. }));
    }

    #[test]
    fn test_all_locked_gate() {
        let ledger = PredictionLedger::new();
        let agents = ["a", "b", "c"];
        assert!(!ledger.all_locked("e-1", &agents));

        ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        ledger.lock(draft("b", Verdict::No, 0.7)).unwrap();
        assert!(!ledger.all_locked("e-1", &agents));
        assert_eq!(ledger.locked_count("e-1", &agents), 2);

        ledger.lock(draft("c", Verdict::Yes, 0.55)).unwrap();
        assert!(ledger.all_locked("e-1", &agents));
    }

    #[test]
    fn test_latest_for_skips_unlocked() {
        let ledger = PredictionLedger::new();
        ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        let latest = ledger.latest_for("e-1", &["a", "b"]);
        assert_eq!(latest.len(), 1);
        assert!(latest.contains_key("a"));
    }

    #[test]
    fn test_chains_isolated_per_event() {
        let ledger = PredictionLedger::new();
        ledger.lock(draft("a", Verdict::Yes, 0.8)).unwrap();
        assert!(ledger.latest("e-2", "a").is_none());
        assert!(ledger.chain("e-2", "a").is_empty());
    }

    #[test]
    fn test_concurrent_locks_different_agents() {
        let ledger = Arc::new(PredictionLedger::new());
        let mut handles = Vec::new();
        for agent in ["a", "b", "c", "d"] {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                ledger.lock(draft(agent, Verdict::Yes, 0.5)).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.locked_count("e-1", &["a", "b", "c", "d"]), 4);
    }

    #[test]
    fn test_chain_sequences_strictly_increase() {
        let ledger = PredictionLedger::new();
        let mut head = ledger.lock(draft("a", Verdict::Yes, 0.9)).unwrap();
        for step in 1..=3u32 {
            let rev = head
                .revise(Verdict::Yes, 0.9 - step as f64 * 0.1, vec![], "step")
                .unwrap();
            head = ledger.lock(rev).unwrap();
        }
        let chain = ledger.chain("e-1", "a");
        let sequences: Vec<u32> = chain.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].supersedes, Some(pair[0].sequence));
        }
    }
}
