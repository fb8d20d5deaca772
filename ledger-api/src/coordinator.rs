//! The interpretation coordinator (spec §4.8): the one transactional
//! entrypoint wiring event ingestion, period validation, reference
//! snapshotting, policy selection, meaning extraction, journal writing and
//! outcome recording into a single call per inbound event.

use std::collections::HashSet;
use std::sync::Arc;

use ledger_approvals::ApprovalRequest;
use ledger_approvals::ApprovalsError;
use ledger_approvals::ApprovalsService;
use ledger_audit::AppendRequest;
use ledger_audit::AuditLog;
use ledger_audit::AuditLogError;
use ledger_events::EventStore;
use ledger_events::EventStoreError;
use ledger_events::IngestEnvelope;
use ledger_journal::JournalError;
use ledger_journal::JournalWriter;
use ledger_journal::PeriodError;
use ledger_journal::PeriodService;
use ledger_journal::PostRequest;
use ledger_outcome::FailureType;
use ledger_outcome::InterpretationOutcome;
use ledger_outcome::OutcomeError;
use ledger_outcome::OutcomeRecorder;
use ledger_outcome::OutcomeStatus;
use ledger_policy::CompiledPolicyPack;
use ledger_policy::DimensionSchema;
use ledger_policy::MeaningResult;
use ledger_policy::SelectResult;
use ledger_snapshot::ReferenceSnapshotService;
use ledger_tenancy::TenantContext;
use thiserror::Error;
use uuid::Uuid;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("event store error: {0}")]
    Event(#[from] EventStoreError),
    #[error("outcome recording failed: {0}")]
    Outcome(#[from] OutcomeError),
    #[error("audit append failed: {0}")]
    Audit(#[from] AuditLogError),
    #[error("approval enqueue failed: {0}")]
    Approvals(#[from] ApprovalsError),
}

impl CoordinatorError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Event(e) => e.code(),
            CoordinatorError::Outcome(_) => "OUTCOME_RECORDING_FAILED",
            CoordinatorError::Audit(_) => "AUDIT_APPEND_FAILED",
            CoordinatorError::Approvals(_) => "APPROVAL_ENQUEUE_FAILED",
        }
    }
}

/// What a caller gets back from `interpret_and_post` (spec §6, the event
/// envelope's response shape).
#[derive(Debug, Clone)]
pub struct CoordinatorResponse {
    pub source_event_id: Uuid,
    pub status: OutcomeStatus,
    pub outcome_id: Uuid,
    pub journal_entry_ids: Vec<Uuid>,
    pub reason_code: Option<String>,
    pub reason_detail: Option<String>,
}

impl CoordinatorResponse {
    fn from_outcome(outcome: &InterpretationOutcome) -> Self {
        Self {
            source_event_id: outcome.source_event_id,
            status: outcome.status,
            outcome_id: outcome.id,
            journal_entry_ids: outcome.journal_entry_ids.clone(),
            reason_code: outcome.reason_code.clone(),
            reason_detail: outcome.detail.clone(),
        }
    }
}

fn action_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Posted => "POSTED",
        OutcomeStatus::Blocked => "BLOCKED",
        OutcomeStatus::Rejected => "REJECTED",
        OutcomeStatus::NonPosting => "NON_POSTING",
        OutcomeStatus::Provisional => "PROVISIONAL",
        OutcomeStatus::Failed => "FAILED",
        OutcomeStatus::Retrying => "RETRYING",
        OutcomeStatus::Abandoned => "ABANDONED",
    }
}

/// PERIOD_CLOSING is a retriable posting-time condition (the close run may
/// still finish and reopen the window for ordinary postings); every other
/// period error reflects a permanently closed or nonexistent window (spec
/// §8's boundary behaviors, which assign these two cases different outcome
/// statuses even though both originate from the same period check).
fn outcome_for_period_error(err: &PeriodError) -> OutcomeStatus {
    match err {
        PeriodError::PeriodClosing(_) => OutcomeStatus::Failed,
        PeriodError::NotFound(_)
        | PeriodError::PeriodClosed(_)
        | PeriodError::AdjustmentsNotAllowed(_)
        | PeriodError::InvalidTransition { .. } => OutcomeStatus::Rejected,
    }
}

fn failure_type_for_journal_error(err: &JournalError) -> FailureType {
    match err {
        JournalError::RoleUnresolved { .. } => FailureType::Contract,
        JournalError::Unbalanced | JournalError::RoundingInvariantViolated => FailureType::Engine,
        JournalError::SubledgerReconciliationFailed(_) => FailureType::Reconciliation,
        JournalError::PeriodClosed(_) | JournalError::PeriodClosing(_) | JournalError::Period(_) => {
            FailureType::Contract
        }
        JournalError::IdempotencyConflict(_) => FailureType::Engine,
        JournalError::SequenceAllocationFailed(_) => FailureType::System,
        JournalError::EntryNotFound(_) | JournalError::AlreadyReversed(_) => FailureType::Contract,
        JournalError::Audit(_) => FailureType::System,
    }
}

/// Composes every service the interpretation pipeline needs (spec §4.8).
/// One coordinator instance serves a whole tenant deployment; the
/// `TenantContext` passed to each call scopes authorization per event.
pub struct Coordinator {
    event_store: Arc<dyn EventStore>,
    period_service: Arc<dyn PeriodService>,
    snapshot_service: Arc<dyn ReferenceSnapshotService>,
    policy_pack: Arc<CompiledPolicyPack>,
    dimension_schema: Arc<dyn DimensionSchema>,
    journal_writer: Arc<JournalWriter>,
    outcome_recorder: Arc<dyn OutcomeRecorder>,
    audit_log: Arc<dyn AuditLog>,
    approvals: Option<Arc<dyn ApprovalsService>>,
    enabled_capabilities: HashSet<String>,
}

impl Coordinator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        period_service: Arc<dyn PeriodService>,
        snapshot_service: Arc<dyn ReferenceSnapshotService>,
        policy_pack: Arc<CompiledPolicyPack>,
        dimension_schema: Arc<dyn DimensionSchema>,
        journal_writer: Arc<JournalWriter>,
        outcome_recorder: Arc<dyn OutcomeRecorder>,
        audit_log: Arc<dyn AuditLog>,
        enabled_capabilities: HashSet<String>,
    ) -> Self {
        Self {
            event_store,
            period_service,
            snapshot_service,
            policy_pack,
            dimension_schema,
            journal_writer,
            outcome_recorder,
            audit_log,
            approvals: None,
            enabled_capabilities,
        }
    }

    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalsService>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    async fn fail_event(
        &self,
        event_id: Uuid,
        actor_id: &str,
        status: OutcomeStatus,
        failure_type: Option<FailureType>,
        reason_code: impl Into<String>,
        detail: Option<String>,
    ) -> CoordinatorResult<CoordinatorResponse> {
        let reason_code = reason_code.into();
        let outcome = self
            .outcome_recorder
            .record(
                event_id,
                status,
                failure_type,
                Some(reason_code.clone()),
                detail,
                Vec::new(),
            )
            .await?;
        self.audit_log
            .append(AppendRequest {
                entity_type: "interpretation_outcome".into(),
                entity_id: event_id.to_string(),
                action: action_label(status).into(),
                actor_id: actor_id.to_string(),
                payload: serde_json::json!({ "reason_code": reason_code }),
            })
            .await?;
        Ok(CoordinatorResponse::from_outcome(&outcome))
    }

    /// Runs one inbound event through the full interpretation pipeline
    /// (spec §4.8 steps 1–8). A crash between steps leaves the event row
    /// (if ingested) and, separately, whatever outcome has already
    /// committed; a retry with the same envelope is always safe.
    #[tracing::instrument(
        skip_all,
        fields(event_id = %envelope.event_id, event_type = %envelope.event_type, tenant_id = %tenant.tenant_id)
    )]
    pub async fn interpret_and_post(
        &self,
        envelope: IngestEnvelope,
        tenant: &TenantContext,
    ) -> CoordinatorResult<CoordinatorResponse> {
        let ingest_result = self.event_store.ingest(envelope).await?;
        let is_duplicate = ingest_result.is_duplicate();
        let event = ingest_result.event().clone();

        if is_duplicate {
            match self.outcome_recorder.get(event.event_id).await {
                Ok(existing) => return Ok(CoordinatorResponse::from_outcome(&existing)),
                Err(OutcomeError::NotFound(_)) => {}
                Err(other) => return Err(other.into()),
            }
        }

        if let Err(period_err) = self
            .period_service
            .validate_effective_date(event.effective_date, false)
            .await
        {
            let status = outcome_for_period_error(&period_err);
            return self
                .fail_event(
                    event.event_id,
                    &tenant.actor_id,
                    status,
                    Some(FailureType::Contract),
                    period_err.code(),
                    Some(period_err.to_string()),
                )
                .await;
        }

        let snapshot = match self.snapshot_service.capture().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Failed,
                        Some(FailureType::Snapshot),
                        "REFERENCE_SNAPSHOT_MISSING",
                        Some(err.to_string()),
                    )
                    .await;
            }
        };

        let policy = match ledger_policy::select(
            &self.policy_pack,
            &event.event_type,
            &event.payload,
            event.effective_date,
            &self.enabled_capabilities,
        ) {
            Err(err) => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Failed,
                        Some(FailureType::Engine),
                        err.code(),
                        Some(err.to_string()),
                    )
                    .await;
            }
            Ok(SelectResult::NoMatch) => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Rejected,
                        Some(FailureType::Contract),
                        "POLICY_NOT_FOUND",
                        None,
                    )
                    .await;
            }
            Ok(SelectResult::Ambiguous) => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Failed,
                        Some(FailureType::Engine),
                        "POLICY_AMBIGUOUS",
                        None,
                    )
                    .await;
            }
            Ok(SelectResult::Selected(policy)) => policy.clone(),
        };

        let meaning = match ledger_policy::build(&policy, event.event_id, &event.payload, self.dimension_schema.as_ref())
        {
            Err(err) => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Failed,
                        Some(FailureType::Engine),
                        err.code(),
                        Some(err.to_string()),
                    )
                    .await;
            }
            Ok(meaning) => meaning,
        };

        let intent = match meaning {
            MeaningResult::Rejected { reason_code, detail } => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Rejected,
                        Some(FailureType::Guard),
                        reason_code,
                        detail,
                    )
                    .await;
            }
            MeaningResult::Blocked { reason_code, detail } => {
                if let Some(approvals) = &self.approvals {
                    let summary = detail.clone().unwrap_or_else(|| reason_code.clone());
                    approvals
                        .enqueue(ApprovalRequest::new(
                            tenant.tenant_id.clone(),
                            event.event_id,
                            reason_code.clone(),
                            summary,
                        ))
                        .await?;
                }
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Blocked,
                        Some(FailureType::Guard),
                        reason_code,
                        detail,
                    )
                    .await;
            }
            MeaningResult::NonPosting { reason_code } => {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::NonPosting,
                        None,
                        reason_code,
                        None,
                    )
                    .await;
            }
            MeaningResult::Posting(intent) => intent,
        };

        // Multi-ledger atomicity (spec §1 non-goals): each ledger intent is
        // its own storage write; once a prior intent in this loop has
        // posted, a later failure leaves it posted rather than rolling it
        // back, since this in-memory writer has no cross-entry transaction.
        let mut journal_entry_ids = Vec::with_capacity(intent.ledger_intents.len());
        for ledger_intent in intent.ledger_intents {
            if let Err(tenancy_err) = tenant.require_can_post_to(&ledger_intent.ledger_id) {
                return self
                    .fail_event(
                        event.event_id,
                        &tenant.actor_id,
                        OutcomeStatus::Rejected,
                        Some(FailureType::Authority),
                        "FORBIDDEN",
                        Some(tenancy_err.to_string()),
                    )
                    .await;
            }

            let request = PostRequest {
                source_event_id: event.event_id,
                idempotency_key: format!("{}:{}", event.event_id, ledger_intent.ledger_id),
                effective_date: event.effective_date,
                actor_id: tenant.actor_id.clone(),
                description: None,
                metadata: serde_json::json!({
                    "policy_id": policy.id,
                    "policy_version": policy.version,
                }),
                snapshot: snapshot.clone(),
                ledger_intent,
                is_close_posting: false,
            };

            match self.journal_writer.write(request).await {
                Ok(entry) => journal_entry_ids.push(entry.id),
                Err(err) => {
                    return self
                        .fail_event(
                            event.event_id,
                            &tenant.actor_id,
                            OutcomeStatus::Failed,
                            Some(failure_type_for_journal_error(&err)),
                            err.code(),
                            Some(err.to_string()),
                        )
                        .await;
                }
            }
        }

        let outcome = self
            .outcome_recorder
            .record(
                event.event_id,
                OutcomeStatus::Posted,
                None,
                None,
                None,
                journal_entry_ids.clone(),
            )
            .await?;
        self.audit_log
            .append(AppendRequest {
                entity_type: "interpretation_outcome".into(),
                entity_id: event.event_id.to_string(),
                action: "POSTED".into(),
                actor_id: tenant.actor_id.clone(),
                payload: serde_json::json!({ "journal_entry_ids": journal_entry_ids }),
            })
            .await?;

        Ok(CoordinatorResponse::from_outcome(&outcome))
    }
}
