#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Interpretation outcome recording (spec §3/§7): exactly one outcome row
//! per `source_event_id`, except that a BLOCKED outcome may be superseded
//! once its approval hold resolves. Every other terminal status is
//! write-once, mirroring the unique-constraint-then-insert check the
//! journal writer itself performs on `idempotency_key`.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type OutcomeResult<T> = Result<T, OutcomeError>;

#[derive(Debug, Error)]
pub enum OutcomeError {
    #[error("an outcome already exists for source_event_id {0} and is not supersedable")]
    AlreadyRecorded(Uuid),
    #[error("no outcome exists for source_event_id {0}")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Posted,
    Blocked,
    Rejected,
    NonPosting,
    Provisional,
    Failed,
    Retrying,
    Abandoned,
}

impl OutcomeStatus {
    /// Only BLOCKED outcomes may later be superseded by a terminal status
    /// once their approval hold resolves (spec §4.4/§7).
    #[must_use]
    pub fn is_supersedable(self) -> bool {
        matches!(self, OutcomeStatus::Blocked | OutcomeStatus::Retrying)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Guard,
    Engine,
    Reconciliation,
    Snapshot,
    Authority,
    Contract,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretationOutcome {
    pub id: Uuid,
    pub source_event_id: Uuid,
    pub status: OutcomeStatus,
    pub failure_type: Option<FailureType>,
    pub reason_code: Option<String>,
    pub detail: Option<String>,
    pub journal_entry_ids: Vec<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub superseded_count: u32,
}

#[async_trait::async_trait]
pub trait OutcomeRecorder: Send + Sync {
    async fn record(
        &self,
        source_event_id: Uuid,
        status: OutcomeStatus,
        failure_type: Option<FailureType>,
        reason_code: Option<String>,
        detail: Option<String>,
        journal_entry_ids: Vec<Uuid>,
    ) -> OutcomeResult<InterpretationOutcome>;

    async fn get(&self, source_event_id: Uuid) -> OutcomeResult<InterpretationOutcome>;
}

#[derive(Default)]
pub struct InMemoryOutcomeRecorder {
    outcomes: RwLock<HashMap<Uuid, InterpretationOutcome>>,
}

impl InMemoryOutcomeRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OutcomeRecorder for InMemoryOutcomeRecorder {
    async fn record(
        &self,
        source_event_id: Uuid,
        status: OutcomeStatus,
        failure_type: Option<FailureType>,
        reason_code: Option<String>,
        detail: Option<String>,
        journal_entry_ids: Vec<Uuid>,
    ) -> OutcomeResult<InterpretationOutcome> {
        let mut guard = self.outcomes.write().await;

        let superseded_count = match guard.get(&source_event_id) {
            Some(existing) if existing.status.is_supersedable() => existing.superseded_count + 1,
            Some(_) => return Err(OutcomeError::AlreadyRecorded(source_event_id)),
            None => 0,
        };

        let outcome = InterpretationOutcome {
            id: Uuid::new_v4(),
            source_event_id,
            status,
            failure_type,
            reason_code,
            detail,
            journal_entry_ids,
            recorded_at: Utc::now(),
            superseded_count,
        };
        guard.insert(source_event_id, outcome.clone());
        Ok(outcome)
    }

    async fn get(&self, source_event_id: Uuid) -> OutcomeResult<InterpretationOutcome> {
        self.outcomes
            .read()
            .await
            .get(&source_event_id)
            .cloned()
            .ok_or(OutcomeError::NotFound(source_event_id))
    }
}
