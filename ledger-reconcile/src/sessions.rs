//! Subledger entry-matching sessions (spec §4.7, SL-G8): propose, score, and
//! accept/reject candidate matches between subledger open items and posted
//! journal lines. Ported from a general ledger-vs-bank reconciliation
//! engine; matches here are always subledger-document-to-journal-line, not
//! bank-statement-to-journal-line, but the session lifecycle is identical.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::ControlError;
use crate::ReconcileResult;

pub type SessionId = String;
pub type CandidateId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: CandidateId,
    pub subledger_document_id: String,
    pub journal_entry_id: String,
    pub proposed_at: DateTime<Utc>,
    pub score: f32,
    pub status: CandidateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_off_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    Pending,
    Accepted,
    PartiallyAccepted,
    Rejected,
    WrittenOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Open,
    PendingPartial,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSession {
    pub id: SessionId,
    pub ledger_id: String,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub candidates: Vec<MatchCandidate>,
}

impl ReconciliationSession {
    fn ensure_mutable(&self) -> ReconcileResult<()> {
        if matches!(self.status, SessionStatus::Closed) {
            Err(ControlError::Storage(format!("session {} is closed", self.id)).into())
        } else {
            Ok(())
        }
    }

    fn add_candidate(&mut self, candidate: MatchCandidate) -> ReconcileResult<()> {
        self.ensure_mutable()?;
        self.candidates.push(candidate);
        Ok(())
    }

    fn accept(&mut self, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate> {
        self.ensure_mutable()?;
        let mut accepted = None;
        for candidate in &mut self.candidates {
            if &candidate.id == candidate_id {
                if !matches!(
                    candidate.status,
                    CandidateStatus::Pending | CandidateStatus::PartiallyAccepted
                ) {
                    return Err(crate::ReconcileError::InvalidTransition(format!(
                        "candidate {candidate_id} is not pending"
                    )));
                }
                candidate.status = CandidateStatus::Accepted;
                candidate.write_off_reason = None;
                accepted = Some(candidate.clone());
            } else if matches!(
                candidate.status,
                CandidateStatus::Pending | CandidateStatus::PartiallyAccepted
            ) {
                candidate.status = CandidateStatus::Rejected;
            }
        }
        let accepted = accepted
            .ok_or_else(|| crate::ReconcileError::CandidateNotFound(candidate_id.clone()))?;
        self.status = SessionStatus::Closed;
        Ok(accepted)
    }

    fn reject(&mut self, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate> {
        self.ensure_mutable()?;
        let candidate = self
            .candidates
            .iter_mut()
            .find(|candidate| candidate.id == *candidate_id)
            .ok_or_else(|| crate::ReconcileError::CandidateNotFound(candidate_id.clone()))?;
        if candidate.status != CandidateStatus::Pending {
            return Err(crate::ReconcileError::InvalidTransition(format!(
                "candidate {candidate_id} is not pending"
            )));
        }
        candidate.status = CandidateStatus::Rejected;
        Ok(candidate.clone())
    }

    fn write_off(
        &mut self,
        candidate_id: &CandidateId,
        reason: String,
    ) -> ReconcileResult<MatchCandidate> {
        self.ensure_mutable()?;
        let candidate = self
            .candidates
            .iter_mut()
            .find(|candidate| candidate.id == *candidate_id)
            .ok_or_else(|| crate::ReconcileError::CandidateNotFound(candidate_id.clone()))?;
        if !matches!(
            candidate.status,
            CandidateStatus::Pending | CandidateStatus::PartiallyAccepted | CandidateStatus::Rejected
        ) {
            return Err(crate::ReconcileError::InvalidTransition(format!(
                "candidate {candidate_id} cannot be written off from status {:?}",
                candidate.status
            )));
        }
        candidate.status = CandidateStatus::WrittenOff;
        candidate.write_off_reason = Some(reason);
        self.status = SessionStatus::PendingPartial;
        Ok(candidate.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchProposal {
    pub subledger_document_id: String,
    pub journal_entry_id: String,
    pub amount_delta_minor: i64,
    pub date_delta_days: i64,
    pub document_description: String,
    pub journal_description: String,
    pub group_id: Option<String>,
}

pub trait ScoringStrategy: Send + Sync {
    fn score(&self, proposal: &MatchProposal) -> f32;
}

#[derive(Debug, Clone)]
pub struct WeightedScoringStrategy {
    amount_weight: f32,
    date_weight: f32,
    description_weight: f32,
    amount_tolerance_minor: i64,
    date_tolerance_days: i64,
}

impl WeightedScoringStrategy {
    #[must_use]
    pub fn new(
        amount_weight: f32,
        date_weight: f32,
        description_weight: f32,
        amount_tolerance_minor: i64,
        date_tolerance_days: i64,
    ) -> Self {
        Self {
            amount_weight,
            date_weight,
            description_weight,
            amount_tolerance_minor: amount_tolerance_minor.max(1),
            date_tolerance_days: date_tolerance_days.max(1),
        }
    }

    fn normalize_amount(&self, delta: i64) -> f32 {
        let ratio = (delta.unsigned_abs() as f32) / (self.amount_tolerance_minor as f32);
        (1.0 - ratio).clamp(0.0, 1.0)
    }

    fn normalize_date(&self, delta: i64) -> f32 {
        let ratio = (delta.unsigned_abs() as f32) / (self.date_tolerance_days as f32);
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

impl Default for WeightedScoringStrategy {
    fn default() -> Self {
        Self::new(0.45, 0.35, 0.20, 100, 7)
    }
}

impl ScoringStrategy for WeightedScoringStrategy {
    fn score(&self, proposal: &MatchProposal) -> f32 {
        let total_weight = self.amount_weight + self.date_weight + self.description_weight;
        if total_weight <= f32::EPSILON {
            return 0.0;
        }
        let amount_component = self.normalize_amount(proposal.amount_delta_minor);
        let date_component = self.normalize_date(proposal.date_delta_days);
        let description_component =
            description_similarity(&proposal.document_description, &proposal.journal_description);
        let weighted = amount_component * self.amount_weight
            + date_component * self.date_weight
            + description_component * self.description_weight;
        (weighted / total_weight).clamp(0.0, 1.0)
    }
}

fn description_similarity(left: &str, right: &str) -> f32 {
    let tokenize = |input: &str| -> BTreeSet<String> {
        input.split_whitespace().map(str::to_ascii_lowercase).collect()
    };
    let left_tokens = tokenize(left);
    let right_tokens = tokenize(right);
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }
    let intersection = left_tokens.intersection(&right_tokens).count() as f32;
    let union = left_tokens.union(&right_tokens).count() as f32;
    if union <= f32::EPSILON {
        0.0
    } else {
        (intersection / union).clamp(0.0, 1.0)
    }
}

pub trait ReconciliationStore: Send + Sync {
    fn create_session(&self, session: ReconciliationSession) -> ReconcileResult<ReconciliationSession>;
    fn save_session(&self, session: &ReconciliationSession) -> ReconcileResult<()>;
    fn get_session(&self, session_id: &SessionId) -> ReconcileResult<ReconciliationSession>;
}

#[derive(Default)]
pub struct InMemoryReconciliationStore {
    sessions: RwLock<HashMap<SessionId, ReconciliationSession>>,
}

impl InMemoryReconciliationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_write<F, T>(&self, f: F) -> ReconcileResult<T>
    where
        F: FnOnce(&mut HashMap<SessionId, ReconciliationSession>) -> ReconcileResult<T>,
    {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| ControlError::Storage("session store poisoned".into()))?;
        f(&mut guard)
    }
}

impl ReconciliationStore for InMemoryReconciliationStore {
    fn create_session(&self, session: ReconciliationSession) -> ReconcileResult<ReconciliationSession> {
        self.with_write(|sessions| {
            sessions.insert(session.id.clone(), session.clone());
            Ok(session)
        })
    }

    fn save_session(&self, session: &ReconciliationSession) -> ReconcileResult<()> {
        self.with_write(|sessions| {
            if !sessions.contains_key(&session.id) {
                return Err(crate::ReconcileError::SessionNotFound(session.id.clone()));
            }
            sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    fn get_session(&self, session_id: &SessionId) -> ReconcileResult<ReconciliationSession> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| ControlError::Storage("session store poisoned".into()))?;
        guard
            .get(session_id)
            .cloned()
            .ok_or_else(|| crate::ReconcileError::SessionNotFound(session_id.clone()))
    }
}

pub trait ReconciliationService: Send + Sync {
    fn create_session(&self, ledger_id: &str) -> ReconcileResult<ReconciliationSession>;
    fn add_candidate(
        &self,
        session_id: &SessionId,
        proposal: MatchProposal,
    ) -> ReconcileResult<MatchCandidate>;
    fn accept(&self, session_id: &SessionId, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate>;
    fn reject(&self, session_id: &SessionId, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate>;
    fn write_off(
        &self,
        session_id: &SessionId,
        candidate_id: &CandidateId,
        reason: String,
    ) -> ReconcileResult<MatchCandidate>;
    fn session(&self, session_id: &SessionId) -> ReconcileResult<ReconciliationSession>;
}

pub struct InMemoryReconciliationService {
    scoring: Arc<dyn ScoringStrategy>,
    store: Arc<dyn ReconciliationStore>,
}

impl InMemoryReconciliationService {
    #[must_use]
    pub fn new(scoring: Arc<dyn ScoringStrategy>) -> Self {
        Self::with_store(scoring, Arc::new(InMemoryReconciliationStore::new()))
    }

    #[must_use]
    pub fn with_store(scoring: Arc<dyn ScoringStrategy>, store: Arc<dyn ReconciliationStore>) -> Self {
        Self { scoring, store }
    }
}

impl ReconciliationService for InMemoryReconciliationService {
    fn create_session(&self, ledger_id: &str) -> ReconcileResult<ReconciliationSession> {
        let session = ReconciliationSession {
            id: Uuid::new_v4().to_string(),
            ledger_id: ledger_id.into(),
            status: SessionStatus::Open,
            opened_at: Utc::now(),
            candidates: Vec::new(),
        };
        self.store.create_session(session)
    }

    fn add_candidate(
        &self,
        session_id: &SessionId,
        proposal: MatchProposal,
    ) -> ReconcileResult<MatchCandidate> {
        let score = self.scoring.score(&proposal);
        let candidate = MatchCandidate {
            id: Uuid::new_v4().to_string(),
            subledger_document_id: proposal.subledger_document_id,
            journal_entry_id: proposal.journal_entry_id,
            proposed_at: Utc::now(),
            score,
            status: CandidateStatus::Pending,
            group_id: proposal.group_id,
            write_off_reason: None,
        };
        let mut session = self.store.get_session(session_id)?;
        session.add_candidate(candidate.clone())?;
        self.store.save_session(&session)?;
        Ok(candidate)
    }

    fn accept(&self, session_id: &SessionId, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate> {
        let mut session = self.store.get_session(session_id)?;
        let accepted = session.accept(candidate_id)?;
        self.store.save_session(&session)?;
        Ok(accepted)
    }

    fn reject(&self, session_id: &SessionId, candidate_id: &CandidateId) -> ReconcileResult<MatchCandidate> {
        let mut session = self.store.get_session(session_id)?;
        let rejected = session.reject(candidate_id)?;
        self.store.save_session(&session)?;
        Ok(rejected)
    }

    fn write_off(
        &self,
        session_id: &SessionId,
        candidate_id: &CandidateId,
        reason: String,
    ) -> ReconcileResult<MatchCandidate> {
        let mut session = self.store.get_session(session_id)?;
        let written_off = session.write_off(candidate_id, reason)?;
        self.store.save_session(&session)?;
        Ok(written_off)
    }

    fn session(&self, session_id: &SessionId) -> ReconcileResult<ReconciliationSession> {
        self.store.get_session(session_id)
    }
}
