//! Arena — debate orchestration core for the AI prediction battle.
//!
//! This crate holds everything that must be deterministic and testable
//! without a network: the prediction data model and its append-only
//! supersession chains, the ledger that locks forecasts before debate, the
//! moderator policy that ranks speakers by unresolved contradictions, the
//! turn-taking scheduler, and snapshot persistence.
//!
//! Model backends, research clients, and event sources live in the
//! `battle-agents` crate and reach this core only through the
//! [`scheduler::TurnSource`] and [`snapshot::TranscriptSink`] boundaries.
//!
//! # Battle Flow
//!
//! ```text
//! EventRecord ──► agents research + predict (isolated, concurrent)
//!                      │
//!                      ▼
//!            PredictionLedger.lock()      ← immutability boundary
//!                      │  all_locked
//!                      ▼
//!            DebateScheduler rounds ──► ModeratorPolicy.next_speakers
//!                      │                      │
//!                      ▼                      ▼
//!            TurnSource.take_turn      contradiction ranking
//!                      │
//!                      ▼
//!            DebateOutcome ──► TranscriptSink / DebateSnapshot
//! ```

pub mod event;
pub mod ledger;
pub mod moderator;
pub mod prediction;
pub mod scheduler;
pub mod snapshot;
pub mod state;

pub use event::EventRecord;
pub use ledger::{LedgerError, PredictionLedger, DEFAULT_QUORUM};
pub use moderator::{Contradiction, ContradictionKind, ModeratorConfig, ModeratorPolicy};
pub use prediction::{KeyClaim, LockState, Prediction, PredictionError, Verdict};
pub use scheduler::{
    DebateOutcome, DebateScheduler, SchedulerConfig, SchedulerError, TerminationReason,
    TurnContext, TurnSource, TurnSourceError,
};
pub use snapshot::{
    restore, validate_snapshot, DebateSnapshot, IntegrityStatus, SinkError, SnapshotError,
    TranscriptSink,
};
pub use state::{
    DebateState, SchedulerPhase, TransitionError, TurnAction, TurnKind, TurnRecord,
};
