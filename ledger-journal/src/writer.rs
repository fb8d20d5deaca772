//! Journal writer (spec §4.5): turns a role-level [`LedgerIntent`] into a
//! posted, hash-chained [`JournalEntry`] inside one storage transaction, or
//! fails closed with a specific [`JournalError`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono::Utc;
use ledger_audit::chain_hash;
use ledger_audit::AppendRequest;
use ledger_audit::AuditLog;
use ledger_audit::GENESIS;
use ledger_domain::canonicalize;
use ledger_domain::CurrencyCode;
use ledger_domain::Side;
use ledger_policy::LedgerIntent;
use ledger_policy::LineSpec;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::period::PeriodService;
use crate::sequence::SequenceAllocator;
use crate::types::EntryStatus;
use crate::types::JournalEntry;
use crate::types::JournalLine;
use crate::types::ReferenceSnapshot;

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("role `{role}` has no binding in ledger `{ledger_id}` as of {as_of}")]
    RoleUnresolved {
        ledger_id: String,
        role: String,
        as_of: NaiveDate,
    },
    #[error("entry is not balanced by currency")]
    Unbalanced,
    #[error("rounding invariant violated")]
    RoundingInvariantViolated,
    #[error("subledger reconciliation failed: {0}")]
    SubledgerReconciliationFailed(String),
    #[error("period is closed for effective date {0}")]
    PeriodClosed(NaiveDate),
    #[error("period is closing for effective date {0}")]
    PeriodClosing(NaiveDate),
    #[error("an entry already exists for idempotency key `{0}`")]
    IdempotencyConflict(String),
    #[error("sequence allocation failed for stream `{0}`")]
    SequenceAllocationFailed(String),
    #[error("entry `{0}` not found")]
    EntryNotFound(Uuid),
    #[error("entry `{0}` is already reversed")]
    AlreadyReversed(Uuid),
    #[error("audit append failed: {0}")]
    Audit(#[from] ledger_audit::AuditLogError),
    #[error("period service error: {0}")]
    Period(#[from] crate::period::PeriodError),
}

impl JournalError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            JournalError::RoleUnresolved { .. } => "L1_ROLE_UNRESOLVED",
            JournalError::Unbalanced => "UNBALANCED",
            JournalError::RoundingInvariantViolated => "ROUNDING_INVARIANT_VIOLATION",
            JournalError::SubledgerReconciliationFailed(_) => "SUBLEDGER_RECONCILIATION_FAILED",
            JournalError::PeriodClosed(_) => "PERIOD_CLOSED",
            JournalError::PeriodClosing(_) => "PERIOD_CLOSING",
            JournalError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            JournalError::SequenceAllocationFailed(_) => "SEQUENCE_ALLOCATION_FAILED",
            JournalError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            JournalError::AlreadyReversed(_) => "ALREADY_REVERSED",
            JournalError::Audit(_) => "AUDIT_APPEND_FAILED",
            JournalError::Period(_) => "PERIOD_SERVICE_ERROR",
        }
    }
}

/// Resolves a symbolic role to a concrete account within a ledger, as of a
/// date (spec §4.5 step 3). Chart-of-accounts ownership lives above this
/// kernel; this trait is the seam.
#[async_trait::async_trait]
pub trait RoleBindingResolver: Send + Sync {
    async fn resolve(
        &self,
        ledger_id: &str,
        role: &str,
        as_of: NaiveDate,
    ) -> Option<(String, u32)>;
}

#[derive(Default)]
pub struct InMemoryRoleBindingResolver {
    bindings: RwLock<Vec<crate::types::RoleBinding>>,
}

impl InMemoryRoleBindingResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, binding: crate::types::RoleBinding) {
        self.bindings.write().await.push(binding);
    }
}

#[async_trait::async_trait]
impl RoleBindingResolver for InMemoryRoleBindingResolver {
    async fn resolve(
        &self,
        ledger_id: &str,
        role: &str,
        as_of: NaiveDate,
    ) -> Option<(String, u32)> {
        let guard = self.bindings.read().await;
        guard
            .iter()
            .filter(|binding| binding.ledger_id == ledger_id && binding.role == role)
            .find(|binding| binding.covers(as_of))
            .map(|binding| (binding.account_id.clone(), binding.coa_version))
    }
}

/// Synchronous control-balance check performed before an entry touching a
/// subledger document is allowed to post (spec §4.7, G9/SL-G3).
#[async_trait::async_trait]
pub trait SubledgerControl: Send + Sync {
    async fn check(
        &self,
        document_type: &str,
        ledger_id: &str,
        lines: &[JournalLine],
    ) -> Result<(), String>;
}

/// Records the subledger-facing entries produced alongside a posted journal
/// entry (spec §4.7 step 9). A no-op implementation is valid when a ledger
/// intent carries no `subledger_document_type`.
#[async_trait::async_trait]
pub trait SubledgerRecorder: Send + Sync {
    async fn record(&self, document_type: &str, entry: &JournalEntry);
}

/// Symbolic role a per-currency rounding residual is posted against (spec
/// §4.5 step 4, "the configured rounding account for that ledger") —
/// resolved through the same role-binding table as any other line.
const ROUNDING_ROLE: &str = "ROUNDING";

/// R5/R22 tolerance: a residual wider than this is a real imbalance, not a
/// rounding artifact, and fails closed rather than being absorbed.
const ROUNDING_TOLERANCE_MINOR_UNITS: i64 = 1;

pub struct PostRequest {
    pub source_event_id: Uuid,
    pub idempotency_key: String,
    pub effective_date: NaiveDate,
    pub actor_id: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub snapshot: ReferenceSnapshot,
    pub ledger_intent: LedgerIntent,
    pub is_close_posting: bool,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<Uuid, JournalEntry>,
    by_idempotency_key: HashMap<String, Uuid>,
    last_hash_by_ledger: HashMap<String, String>,
}

pub struct JournalWriter {
    audit_log: Arc<dyn AuditLog>,
    period_service: Arc<dyn PeriodService>,
    sequence: Arc<SequenceAllocator>,
    role_resolver: Arc<dyn RoleBindingResolver>,
    subledger_control: Option<Arc<dyn SubledgerControl>>,
    subledger_recorder: Option<Arc<dyn SubledgerRecorder>>,
    state: RwLock<LedgerState>,
}

impl JournalWriter {
    #[must_use]
    pub fn new(
        audit_log: Arc<dyn AuditLog>,
        period_service: Arc<dyn PeriodService>,
        sequence: Arc<SequenceAllocator>,
        role_resolver: Arc<dyn RoleBindingResolver>,
    ) -> Self {
        Self {
            audit_log,
            period_service,
            sequence,
            role_resolver,
            subledger_control: None,
            subledger_recorder: None,
            state: RwLock::new(LedgerState::default()),
        }
    }

    #[must_use]
    pub fn with_subledger_control(mut self, control: Arc<dyn SubledgerControl>) -> Self {
        self.subledger_control = Some(control);
        self
    }

    #[must_use]
    pub fn with_subledger_recorder(mut self, recorder: Arc<dyn SubledgerRecorder>) -> Self {
        self.subledger_recorder = Some(recorder);
        self
    }

    async fn resolve_lines(
        &self,
        ledger_id: &str,
        entry_id: Uuid,
        lines: &[LineSpec],
        as_of: NaiveDate,
    ) -> JournalResult<Vec<JournalLine>> {
        let mut resolved = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let (account_id, _coa_version) = self
                .role_resolver
                .resolve(ledger_id, &line.role, as_of)
                .await
                .ok_or_else(|| JournalError::RoleUnresolved {
                    ledger_id: ledger_id.to_string(),
                    role: line.role.clone(),
                    as_of,
                })?;
            resolved.push(JournalLine {
                id: Uuid::new_v4(),
                journal_entry_id: entry_id,
                line_seq: idx as u32,
                account_id,
                side: line.side,
                amount_minor_units: line.money.minor_units,
                currency: line.money.currency.clone(),
                dimensions: line.dimensions.clone(),
                exchange_rate_id: None,
                is_rounding: false,
                memo: None,
            });
        }
        Ok(resolved)
    }

    /// Computes any per-currency rounding residual left after role
    /// resolution and appends at most one rounding line per currency to
    /// absorb it (spec §4.5 step 4–5). A residual outside tolerance is a
    /// real imbalance and fails closed with `Unbalanced`.
    async fn apply_rounding_lines(
        &self,
        ledger_id: &str,
        entry_id: Uuid,
        lines: &mut Vec<JournalLine>,
        as_of: NaiveDate,
    ) -> JournalResult<()> {
        let mut residuals: HashMap<CurrencyCode, i64> = HashMap::new();
        for line in lines.iter() {
            let signed = match line.side {
                Side::Debit => line.amount_minor_units,
                Side::Credit => -line.amount_minor_units,
            };
            *residuals.entry(line.currency.clone()).or_insert(0) += signed;
        }

        for (currency, residual) in residuals {
            if residual == 0 {
                continue;
            }
            if residual.abs() > ROUNDING_TOLERANCE_MINOR_UNITS {
                return Err(JournalError::Unbalanced);
            }
            let (account_id, _coa_version) = self
                .role_resolver
                .resolve(ledger_id, ROUNDING_ROLE, as_of)
                .await
                .ok_or_else(|| JournalError::RoleUnresolved {
                    ledger_id: ledger_id.to_string(),
                    role: ROUNDING_ROLE.to_string(),
                    as_of,
                })?;
            let side = if residual > 0 { Side::Credit } else { Side::Debit };
            let line_seq = lines.len() as u32;
            lines.push(JournalLine {
                id: Uuid::new_v4(),
                journal_entry_id: entry_id,
                line_seq,
                account_id,
                side,
                amount_minor_units: residual.abs(),
                currency,
                dimensions: HashMap::new(),
                exchange_rate_id: None,
                is_rounding: true,
                memo: Some("rounding".into()),
            });
        }
        Ok(())
    }

    fn entry_payload_hash(entry: &JournalEntry) -> String {
        let value = serde_json::json!({
            "id": entry.id,
            "ledger_id": entry.ledger_id,
            "source_event_id": entry.source_event_id,
            "effective_date": entry.effective_date,
            "idempotency_key": entry.idempotency_key,
            "reversal_of_id": entry.reversal_of_id,
            "lines": entry.lines.iter().map(|line| serde_json::json!({
                "account_id": line.account_id,
                "side": line.side,
                "amount_minor_units": line.amount_minor_units,
                "currency": line.currency,
            })).collect::<Vec<_>>(),
        });
        use sha2::Digest;
        let mut hasher = sha2::Sha256::new();
        hasher.update(canonicalize(&value).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Posts one ledger intent as one journal entry. Posting multiple
    /// ledgers from the same accounting intent means calling this once per
    /// [`LedgerIntent`]; callers that need all-or-nothing across ledgers
    /// must validate every intent before committing any of them (the
    /// interpretation coordinator owns that orchestration).
    pub async fn write(&self, request: PostRequest) -> JournalResult<JournalEntry> {
        self.period_service
            .validate_effective_date(request.effective_date, request.is_close_posting)
            .await
            .map_err(|err| match err {
                crate::period::PeriodError::PeriodClosed(_) => {
                    JournalError::PeriodClosed(request.effective_date)
                }
                crate::period::PeriodError::PeriodClosing(_) => {
                    JournalError::PeriodClosing(request.effective_date)
                }
                other => JournalError::Period(other),
            })?;

        {
            let guard = self.state.read().await;
            let existing = guard
                .by_idempotency_key
                .get(&request.idempotency_key)
                .and_then(|existing_id| guard.entries.get(existing_id));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }

        let entry_id = Uuid::new_v4();
        let ledger_id = request.ledger_intent.ledger_id.clone();
        let mut lines = self
            .resolve_lines(&ledger_id, entry_id, &request.ledger_intent.lines, request.effective_date)
            .await?;
        self.apply_rounding_lines(&ledger_id, entry_id, &mut lines, request.effective_date)
            .await?;

        let stream_key = format!("ledger:{ledger_id}");
        let seq = self.sequence.next(&stream_key).await;

        let mut guard = self.state.write().await;
        if guard.by_idempotency_key.contains_key(&request.idempotency_key) {
            return Err(JournalError::IdempotencyConflict(request.idempotency_key));
        }

        let prev_hash = guard
            .last_hash_by_ledger
            .get(&ledger_id)
            .cloned()
            .unwrap_or_else(|| GENESIS.to_string());

        let mut entry = JournalEntry {
            id: entry_id,
            ledger_id: ledger_id.clone(),
            source_event_id: request.source_event_id,
            effective_date: request.effective_date,
            posted_at: Some(Utc::now()),
            status: EntryStatus::Posted,
            seq,
            idempotency_key: request.idempotency_key.clone(),
            reversal_of_id: None,
            description: request.description,
            metadata: request.metadata,
            snapshot: request.snapshot,
            prev_hash: prev_hash.clone(),
            hash: String::new(),
            lines,
        };

        if !entry.is_balanced() {
            return Err(JournalError::Unbalanced);
        }
        if !entry.rounding_invariant_holds() {
            return Err(JournalError::RoundingInvariantViolated);
        }

        if let Some(document_type) = &request.ledger_intent.subledger_document_type
            && let Some(control) = &self.subledger_control
        {
            control
                .check(document_type, &ledger_id, &entry.lines)
                .await
                .map_err(JournalError::SubledgerReconciliationFailed)?;
        }

        let content_hash = Self::entry_payload_hash(&entry);
        entry.hash = chain_hash(&content_hash, &prev_hash);

        guard.last_hash_by_ledger.insert(ledger_id.clone(), entry.hash.clone());
        guard.by_idempotency_key.insert(request.idempotency_key.clone(), entry.id);
        guard.entries.insert(entry.id, entry.clone());
        drop(guard);

        if let Some(document_type) = &request.ledger_intent.subledger_document_type
            && let Some(recorder) = &self.subledger_recorder
        {
            recorder.record(document_type, &entry).await;
        }

        self.audit_log
            .append(AppendRequest {
                entity_type: "journal_entry".into(),
                entity_id: entry.id.to_string(),
                action: "POSTED".into(),
                actor_id: request.actor_id,
                payload: serde_json::json!({
                    "ledger_id": entry.ledger_id,
                    "seq": entry.seq,
                    "idempotency_key": entry.idempotency_key,
                    "hash": entry.hash,
                }),
            })
            .await?;

        Ok(entry)
    }

    /// Reverses a posted entry by writing a new entry with every line's side
    /// flipped, linked via `reversal_of_id` (spec §4.5, immutability via
    /// compensation rather than mutation).
    pub async fn write_reversal(
        &self,
        original_id: Uuid,
        effective_date: NaiveDate,
        actor_id: String,
        reason: Option<String>,
    ) -> JournalResult<JournalEntry> {
        let original = {
            let guard = self.state.read().await;
            guard
                .entries
                .get(&original_id)
                .cloned()
                .ok_or(JournalError::EntryNotFound(original_id))?
        };

        let already_reversed = {
            let guard = self.state.read().await;
            guard
                .entries
                .values()
                .any(|entry| entry.reversal_of_id == Some(original_id))
        };
        if already_reversed {
            return Err(JournalError::AlreadyReversed(original_id));
        }

        self.period_service
            .validate_effective_date(effective_date, true)
            .await
            .map_err(|err| match err {
                crate::period::PeriodError::PeriodClosed(_) => JournalError::PeriodClosed(effective_date),
                crate::period::PeriodError::PeriodClosing(_) => JournalError::PeriodClosing(effective_date),
                other => JournalError::Period(other),
            })?;

        let entry_id = Uuid::new_v4();
        let idempotency_key = format!("reversal:{original_id}:{}", original.ledger_id);

        let stream_key = format!("ledger:{}", original.ledger_id);
        let seq = self.sequence.next(&stream_key).await;

        let mut guard = self.state.write().await;
        let prev_hash = guard
            .last_hash_by_ledger
            .get(&original.ledger_id)
            .cloned()
            .unwrap_or_else(|| GENESIS.to_string());

        let lines: Vec<JournalLine> = original
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| JournalLine {
                id: Uuid::new_v4(),
                journal_entry_id: entry_id,
                line_seq: idx as u32,
                account_id: line.account_id.clone(),
                side: line.side.flip(),
                amount_minor_units: line.amount_minor_units,
                currency: line.currency.clone(),
                dimensions: line.dimensions.clone(),
                exchange_rate_id: line.exchange_rate_id.clone(),
                is_rounding: line.is_rounding,
                memo: line.memo.clone(),
            })
            .collect();

        let mut entry = JournalEntry {
            id: entry_id,
            ledger_id: original.ledger_id.clone(),
            source_event_id: original.source_event_id,
            effective_date,
            posted_at: Some(Utc::now()),
            status: EntryStatus::Posted,
            seq,
            idempotency_key: idempotency_key.clone(),
            reversal_of_id: Some(original_id),
            description: reason,
            metadata: serde_json::json!({}),
            snapshot: original.snapshot.clone(),
            prev_hash: prev_hash.clone(),
            hash: String::new(),
            lines,
        };

        let content_hash = Self::entry_payload_hash(&entry);
        entry.hash = chain_hash(&content_hash, &prev_hash);

        guard
            .last_hash_by_ledger
            .insert(original.ledger_id.clone(), entry.hash.clone());
        guard.by_idempotency_key.insert(idempotency_key, entry.id);
        guard.entries.insert(entry.id, entry.clone());
        drop(guard);

        self.audit_log
            .append(AppendRequest {
                entity_type: "journal_entry".into(),
                entity_id: entry.id.to_string(),
                action: "REVERSED".into(),
                actor_id,
                payload: serde_json::json!({
                    "reversal_of_id": original_id,
                    "ledger_id": entry.ledger_id,
                    "seq": entry.seq,
                    "hash": entry.hash,
                }),
            })
            .await?;

        Ok(entry)
    }

    pub async fn get(&self, entry_id: Uuid) -> Option<JournalEntry> {
        self.state.read().await.entries.get(&entry_id).cloned()
    }

    pub async fn get_by_source_event(&self, source_event_id: Uuid) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.source_event_id == source_event_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.ledger_id.clone(), entry.seq));
        entries
    }

    /// Posted entries for one ledger, ordered by `seq` — the read-model
    /// selectors' basis for trial balances and the canonical ledger hash
    /// (spec §10.5, R24).
    pub async fn list_posted(&self, ledger_id: &str) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.ledger_id == ledger_id && entry.is_posted())
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }
}

#[cfg(test)]
mod tests {
    use ledger_audit::InMemoryAuditLog;
    use ledger_domain::CurrencyCode;
    use ledger_domain::Money;
    use ledger_domain::Side;
    use ledger_policy::LineSpec;

    use super::*;
    use crate::period::InMemoryPeriodService;
    use crate::period::PeriodService;
    use crate::types::RoleBinding;

    fn snapshot() -> ReferenceSnapshot {
        ReferenceSnapshot {
            coa_version: 1,
            dimension_schema_version: 1,
            currency_registry_version: 1,
            rounding_policy_version: 1,
            config_checksum: "checksum".into(),
            captured_at: Utc::now(),
        }
    }

    async fn writer_with_bindings() -> (JournalWriter, Arc<InMemoryRoleBindingResolver>, NaiveDate) {
        let period_service = Arc::new(InMemoryPeriodService::new());
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 15).expect("valid date");
        period_service
            .open(
                "2026-01",
                NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(2026, 1, 31).expect("valid date"),
            )
            .await
            .expect("open period");

        let resolver = Arc::new(InMemoryRoleBindingResolver::new());
        resolver
            .bind(RoleBinding {
                ledger_id: "GL".into(),
                role: "EXPENSE".into(),
                account_id: "6000".into(),
                coa_version: 1,
                effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
                effective_to: None,
            })
            .await;
        resolver
            .bind(RoleBinding {
                ledger_id: "GL".into(),
                role: "CONTROL_AP".into(),
                account_id: "2000".into(),
                coa_version: 1,
                effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
                effective_to: None,
            })
            .await;

        let writer = JournalWriter::new(
            InMemoryAuditLog::shared(),
            period_service,
            Arc::new(SequenceAllocator::new()),
            resolver.clone(),
        );
        (writer, resolver, as_of)
    }

    fn invoice_intent() -> LedgerIntent {
        let usd = CurrencyCode::new("USD").expect("valid currency");
        LedgerIntent {
            ledger_id: "GL".into(),
            lines: vec![
                LineSpec {
                    role: "EXPENSE".into(),
                    side: Side::Debit,
                    money: Money::new(1_500_000, usd.clone()).expect("valid money"),
                    dimensions: HashMap::new(),
                },
                LineSpec {
                    role: "CONTROL_AP".into(),
                    side: Side::Credit,
                    money: Money::new(1_500_000, usd).expect("valid money"),
                    dimensions: HashMap::new(),
                },
            ],
            subledger_document_type: Some("ap_invoice".into()),
        }
    }

    #[tokio::test]
    async fn writes_a_balanced_entry_and_chains_its_hash() {
        let (writer, _resolver, as_of) = writer_with_bindings().await;

        let first = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-1".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: invoice_intent(),
                is_close_posting: false,
            })
            .await
            .expect("posts");

        assert_eq!(first.prev_hash, GENESIS);
        assert!(first.is_balanced());

        let second = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-2".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: invoice_intent(),
                is_close_posting: false,
            })
            .await
            .expect("posts");

        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(second.seq, first.seq + 1);
    }

    #[tokio::test]
    async fn write_is_idempotent_for_the_same_key() {
        let (writer, _resolver, as_of) = writer_with_bindings().await;
        let request = || PostRequest {
            source_event_id: Uuid::new_v4(),
            idempotency_key: "evt-1".into(),
            effective_date: as_of,
            actor_id: "system".into(),
            description: None,
            metadata: serde_json::json!({}),
            snapshot: snapshot(),
            ledger_intent: invoice_intent(),
            is_close_posting: false,
        };

        let first = writer.write(request()).await.expect("posts");
        let second = writer.write(request()).await.expect("returns cached entry");
        assert_eq!(first.id, second.id);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn unresolved_role_fails_closed() {
        let (writer, _resolver, as_of) = writer_with_bindings().await;
        let usd = CurrencyCode::new("USD").expect("valid currency");
        let intent = LedgerIntent {
            ledger_id: "GL".into(),
            lines: vec![LineSpec {
                role: "UNKNOWN_ROLE".into(),
                side: Side::Debit,
                money: Money::new(100, usd).expect("valid money"),
                dimensions: HashMap::new(),
            }],
            subledger_document_type: None,
        };

        let err = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-3".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: intent,
                is_close_posting: false,
            })
            .await
            .expect_err("unresolved role must fail");
        assert_eq!(err.code(), "L1_ROLE_UNRESOLVED");
    }

    #[tokio::test]
    async fn a_one_minor_unit_residual_is_absorbed_by_a_rounding_line() {
        let (writer, resolver, as_of) = writer_with_bindings().await;
        resolver
            .bind(RoleBinding {
                ledger_id: "GL".into(),
                role: "ROUNDING".into(),
                account_id: "9999".into(),
                coa_version: 1,
                effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
                effective_to: None,
            })
            .await;

        let usd = CurrencyCode::new("USD").expect("valid currency");
        let intent = LedgerIntent {
            ledger_id: "GL".into(),
            lines: vec![
                LineSpec {
                    role: "EXPENSE".into(),
                    side: Side::Debit,
                    money: Money::new(1_000_001, usd.clone()).expect("valid money"),
                    dimensions: HashMap::new(),
                },
                LineSpec {
                    role: "CONTROL_AP".into(),
                    side: Side::Credit,
                    money: Money::new(1_000_000, usd).expect("valid money"),
                    dimensions: HashMap::new(),
                },
            ],
            subledger_document_type: None,
        };

        let entry = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-rounding".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: intent,
                is_close_posting: false,
            })
            .await
            .expect("posts with a rounding line");

        assert!(entry.is_balanced());
        assert!(entry.rounding_invariant_holds());
        let rounding_lines: Vec<_> = entry.lines.iter().filter(|line| line.is_rounding).collect();
        assert_eq!(rounding_lines.len(), 1);
        assert_eq!(rounding_lines[0].amount_minor_units, 1);
        assert_eq!(rounding_lines[0].side, Side::Credit);
    }

    #[tokio::test]
    async fn a_residual_beyond_tolerance_is_rejected_not_rounded() {
        let (writer, _resolver, as_of) = writer_with_bindings().await;
        let usd = CurrencyCode::new("USD").expect("valid currency");
        let intent = LedgerIntent {
            ledger_id: "GL".into(),
            lines: vec![
                LineSpec {
                    role: "EXPENSE".into(),
                    side: Side::Debit,
                    money: Money::new(1_000_050, usd.clone()).expect("valid money"),
                    dimensions: HashMap::new(),
                },
                LineSpec {
                    role: "CONTROL_AP".into(),
                    side: Side::Credit,
                    money: Money::new(1_000_000, usd).expect("valid money"),
                    dimensions: HashMap::new(),
                },
            ],
            subledger_document_type: None,
        };

        let err = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-imbalanced".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: intent,
                is_close_posting: false,
            })
            .await
            .expect_err("residual beyond tolerance must fail");
        assert_eq!(err.code(), "UNBALANCED");
    }

    #[tokio::test]
    async fn reversal_flips_every_line_side() {
        let (writer, _resolver, as_of) = writer_with_bindings().await;
        let original = writer
            .write(PostRequest {
                source_event_id: Uuid::new_v4(),
                idempotency_key: "evt-1".into(),
                effective_date: as_of,
                actor_id: "system".into(),
                description: None,
                metadata: serde_json::json!({}),
                snapshot: snapshot(),
                ledger_intent: invoice_intent(),
                is_close_posting: false,
            })
            .await
            .expect("posts");

        let reversal = writer
            .write_reversal(original.id, as_of, "system".into(), Some("error correction".into()))
            .await
            .expect("reverses");

        assert_eq!(reversal.reversal_of_id, Some(original.id));
        for (original_line, reversed_line) in original.lines.iter().zip(reversal.lines.iter()) {
            assert_eq!(original_line.side.flip(), reversed_line.side);
            assert_eq!(original_line.amount_minor_units, reversed_line.amount_minor_units);
        }

        let err = writer
            .write_reversal(original.id, as_of, "system".into(), None)
            .await
            .expect_err("cannot reverse twice");
        assert_eq!(err.code(), "ALREADY_REVERSED");
    }
}
