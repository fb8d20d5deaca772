#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Approval holds for BLOCKED interpretation outcomes (spec §4.4/§7): a
//! guard can route an event to a human queue instead of rejecting it
//! outright. Resolving the hold here is what lets the coordinator resume
//! interpretation for `source_event_id`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ApprovalId = String;
pub type TenantId = String;
pub type UserId = String;

pub type ApprovalsResult<T> = Result<T, ApprovalsError>;

#[derive(Debug, Error)]
pub enum ApprovalsError {
    #[error("approval {0} was not found")]
    NotFound(String),
    #[error("approval is already assigned to {assignee}")]
    AlreadyAssigned { assignee: UserId },
    #[error("approval is not assigned to {0}")]
    NotAssigned(UserId),
    #[error("approval is finalized and cannot transition")]
    Finalized,
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStage {
    #[serde(default)]
    pub approvers: Vec<UserId>,
}

impl ApprovalStage {
    #[must_use]
    pub fn allows(&self, user_id: &UserId) -> bool {
        self.approvers.is_empty() || self.approvers.iter().any(|candidate| candidate == user_id)
    }
}

/// A hold created when a guard evaluates to BLOCK (spec §4.4). Resolving it
/// `Approved` is what the coordinator treats as permission to retry
/// `source_event_id` through the interpretation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub tenant_id: TenantId,
    pub source_event_id: Uuid,
    pub reason_code: String,
    pub submitted_at: DateTime<Utc>,
    pub summary: String,
    pub amount_minor: i64,
    pub currency: String,
    pub priority: ApprovalPriority,
    pub sla_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<ApprovalStage>,
}

impl ApprovalRequest {
    #[must_use]
    pub fn new(tenant_id: TenantId, source_event_id: Uuid, reason_code: String, summary: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            source_event_id,
            reason_code,
            submitted_at: Utc::now(),
            summary,
            amount_minor: 0,
            currency: "USD".into(),
            priority: ApprovalPriority::Normal,
            sla_at: None,
            stages: Vec::new(),
        }
    }

    pub fn validate(&self) -> ApprovalsResult<()> {
        if self.summary.trim().is_empty() {
            return Err(ApprovalsError::Validation(
                "approval summary must be provided".into(),
            ));
        }
        if self.reason_code.trim().is_empty() {
            return Err(ApprovalsError::Validation(
                "approval reason_code must be provided".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Assigned,
    Approved,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approved,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: ApprovalDecision,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub request: ApprovalRequest,
    pub status: ApprovalStatus,
    pub assigned_to: Option<UserId>,
    pub decision: Option<DecisionRecord>,
    pub current_stage_index: usize,
    pub stage_decisions: Vec<Option<DecisionRecord>>,
}

impl ApprovalTask {
    fn new(mut request: ApprovalRequest) -> Self {
        if request.stages.is_empty() {
            request.stages.push(ApprovalStage {
                approvers: Vec::new(),
            });
        }
        let stage_count = request.stages.len();
        Self {
            request,
            status: ApprovalStatus::Pending,
            assigned_to: None,
            decision: None,
            current_stage_index: 0,
            stage_decisions: vec![None; stage_count],
        }
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        matches!(self.status, ApprovalStatus::Approved | ApprovalStatus::Declined)
    }

    /// `true` once the hold has resolved in the event's favor; the
    /// coordinator uses this to decide whether to retry interpretation.
    #[must_use]
    pub fn unblocks_source_event(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub tenant_id: Option<TenantId>,
    pub assignee: Option<UserId>,
    pub status: Option<ApprovalStatus>,
}

impl QueueFilter {
    #[must_use]
    pub fn matches(&self, task: &ApprovalTask) -> bool {
        if let Some(tenant_id) = &self.tenant_id
            && task.request.tenant_id != *tenant_id
        {
            return false;
        }
        if let Some(assignee) = &self.assignee
            && task.assigned_to.as_ref() != Some(assignee)
        {
            return false;
        }
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub decided_by: UserId,
    pub decision: ApprovalDecision,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ApprovalsService: Send + Sync {
    async fn enqueue(&self, request: ApprovalRequest) -> ApprovalsResult<ApprovalTask>;
    async fn get(&self, approval_id: &ApprovalId) -> ApprovalsResult<ApprovalTask>;
    async fn list(&self, filter: QueueFilter) -> ApprovalsResult<Vec<ApprovalTask>>;
    async fn assign(&self, approval_id: &ApprovalId, assignee: UserId) -> ApprovalsResult<ApprovalTask>;
    async fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: DecisionInput,
    ) -> ApprovalsResult<ApprovalTask>;
    /// Open (non-finalized) holds against a given `source_event_id`, so a
    /// caller can tell whether an event is still parked awaiting approval.
    async fn open_holds_for_event(&self, source_event_id: Uuid) -> ApprovalsResult<Vec<ApprovalTask>>;
}

#[derive(Default)]
pub struct InMemoryApprovalsService {
    tasks: RwLock<HashMap<ApprovalId, ApprovalTask>>,
}

impl InMemoryApprovalsService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalsService for InMemoryApprovalsService {
    async fn enqueue(&self, request: ApprovalRequest) -> ApprovalsResult<ApprovalTask> {
        request.validate()?;
        let mut guard = self.tasks.write().await;
        let task = ApprovalTask::new(request);
        guard.insert(task.request.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, approval_id: &ApprovalId) -> ApprovalsResult<ApprovalTask> {
        let guard = self.tasks.read().await;
        guard
            .get(approval_id)
            .cloned()
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))
    }

    async fn list(&self, filter: QueueFilter) -> ApprovalsResult<Vec<ApprovalTask>> {
        let guard = self.tasks.read().await;
        Ok(guard.values().filter(|task| filter.matches(task)).cloned().collect())
    }

    async fn assign(&self, approval_id: &ApprovalId, assignee: UserId) -> ApprovalsResult<ApprovalTask> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))?;
        if task.is_finalized() {
            return Err(ApprovalsError::Finalized);
        }
        let stage = task
            .request
            .stages
            .get(task.current_stage_index)
            .ok_or_else(|| ApprovalsError::Validation("missing approval stage".into()))?;
        if !stage.allows(&assignee) {
            return Err(ApprovalsError::Validation(format!(
                "{assignee} is not an approver for stage {}",
                task.current_stage_index + 1
            )));
        }
        if let Some(current) = &task.assigned_to
            && current != &assignee
        {
            return Err(ApprovalsError::AlreadyAssigned {
                assignee: current.clone(),
            });
        }
        task.assigned_to = Some(assignee);
        task.status = ApprovalStatus::Assigned;
        Ok(task.clone())
    }

    async fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: DecisionInput,
    ) -> ApprovalsResult<ApprovalTask> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))?;
        if task.is_finalized() {
            return Err(ApprovalsError::Finalized);
        }
        let stage = task
            .request
            .stages
            .get(task.current_stage_index)
            .ok_or_else(|| ApprovalsError::Validation("missing approval stage".into()))?;
        if !stage.allows(&decision.decided_by) {
            return Err(ApprovalsError::Validation(format!(
                "{} is not an approver for stage {}",
                decision.decided_by,
                task.current_stage_index + 1
            )));
        }
        if let Some(current) = &task.assigned_to
            && current != &decision.decided_by
        {
            return Err(ApprovalsError::NotAssigned(current.clone()));
        }

        let record = DecisionRecord {
            decision: decision.decision,
            decided_by: decision.decided_by,
            decided_at: Utc::now(),
            reason: decision.reason,
        };
        task.stage_decisions[task.current_stage_index] = Some(record.clone());
        task.assigned_to = None;

        match record.decision {
            ApprovalDecision::Approved => {
                if task.current_stage_index + 1 >= task.request.stages.len() {
                    task.status = ApprovalStatus::Approved;
                    task.decision = Some(record);
                } else {
                    task.current_stage_index += 1;
                    task.status = ApprovalStatus::Pending;
                    task.decision = None;
                }
            }
            ApprovalDecision::Declined => {
                task.status = ApprovalStatus::Declined;
                task.decision = Some(record);
            }
        }
        Ok(task.clone())
    }

    async fn open_holds_for_event(&self, source_event_id: Uuid) -> ApprovalsResult<Vec<ApprovalTask>> {
        let guard = self.tasks.read().await;
        Ok(guard
            .values()
            .filter(|task| task.request.source_event_id == source_event_id && !task.is_finalized())
            .cloned()
            .collect())
    }
}
