#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Subledger control reconciliation (spec §4.7): a synchronous
//! control-balance check invoked by the journal writer before a
//! subledger-touching entry posts, plus entry-matching sessions for
//! resolving subledger items against posted journal lines after the fact.

pub mod control;
pub mod sessions;

use thiserror::Error;

pub use control::ControlBalanceChecker;
pub use control::ControlError;
pub use sessions::CandidateId;
pub use sessions::CandidateStatus;
pub use sessions::InMemoryReconciliationService;
pub use sessions::InMemoryReconciliationStore;
pub use sessions::MatchCandidate;
pub use sessions::MatchProposal;
pub use sessions::ReconciliationService;
pub use sessions::ReconciliationSession;
pub use sessions::ReconciliationStore;
pub use sessions::ScoringStrategy;
pub use sessions::SessionId;
pub use sessions::SessionStatus;
pub use sessions::WeightedScoringStrategy;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("candidate {0} not found")]
    CandidateNotFound(CandidateId),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error(transparent)]
    Control(#[from] ControlError),
}
