#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Append-only, hash-chained audit log. One global chain of `AuditEvent`
//! records; every state-affecting action in the kernel appends to it.
//! Verification recomputes the chain end-to-end and fails closed on the
//! first mismatch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use ledger_domain::canonicalize;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type AuditLogResult<T> = Result<T, AuditLogError>;

/// The chain's root value. The first record in a chain is always appended
/// with `prev_hash = GENESIS`.
pub const GENESIS: &str = "genesis";

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain at seq {seq}: {detail}")]
    Corrupted { seq: u64, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub seq: u64,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

/// `Ok(())` if the whole chain re-derives; otherwise the sequence number of
/// the first record whose stored hash does not match its recomputed hash.
pub type VerifyResult = AuditLogResult<()>;

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditEvent>;

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditEvent>>;

    async fn verify(&self, from_seq: u64, to_seq: u64) -> VerifyResult;
}

/// Hashes the canonicalized content of one audit record, independent of its
/// position in the chain. Folding every descriptive field in (not only the
/// free-form `payload`) means tampering with `entity_id`/`action`/`actor_id`
/// after the fact is detectable too, not only payload tampering.
#[must_use]
pub fn payload_hash(
    entity_type: &str,
    entity_id: &str,
    action: &str,
    actor_id: &str,
    occurred_at: DateTime<Utc>,
    payload: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_bytes());
    hasher.update(entity_id.as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(actor_id.as_bytes());
    let nanos = occurred_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| occurred_at.timestamp_micros() * 1_000);
    hasher.update(nanos.to_be_bytes());
    hasher.update(canonicalize(payload).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `hash(n) = H(payload_hash(n) || prev_hash(n))`, the chain link required
/// by R11. Exposed so the canonical-ledger-hash selector (R24) can link
/// journal-entry hashes with the same primitive rather than inventing a
/// second hashing scheme.
#[must_use]
pub fn chain_hash(payload_hash: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_hash.as_bytes());
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn validate_request(request: &AppendRequest) -> AuditLogResult<()> {
        if request.entity_type.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_type must be provided".into(),
            ));
        }
        if request.entity_id.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_id must be provided".into(),
            ));
        }
        if request.action.trim().is_empty() {
            return Err(AuditLogError::Validation("action must be provided".into()));
        }
        if request.actor_id.trim().is_empty() {
            return Err(AuditLogError::Validation("actor_id must be provided".into()));
        }
        Ok(())
    }

    fn verify_slice(records: &[AuditEvent], chain_start_hash: &str) -> VerifyResult {
        let mut previous = chain_start_hash.to_string();
        for record in records {
            if record.prev_hash != previous {
                return Err(AuditLogError::Corrupted {
                    seq: record.seq,
                    detail: "prev_hash does not match predecessor".into(),
                });
            }
            let expected_payload_hash = payload_hash(
                &record.entity_type,
                &record.entity_id,
                &record.action,
                &record.actor_id,
                record.occurred_at,
                &record.payload,
            );
            if expected_payload_hash != record.payload_hash {
                return Err(AuditLogError::Corrupted {
                    seq: record.seq,
                    detail: "payload_hash does not match recomputed content hash".into(),
                });
            }
            let expected_hash = chain_hash(&expected_payload_hash, &record.prev_hash);
            if expected_hash != record.hash {
                return Err(AuditLogError::Corrupted {
                    seq: record.seq,
                    detail: "hash does not match payload_hash||prev_hash".into(),
                });
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditEvent> {
        Self::validate_request(&request)?;

        let mut guard = self.records.write().await;
        let prev_hash = guard
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        let seq = guard.last().map(|record| record.seq + 1).unwrap_or(1);

        let occurred_at = Utc::now();
        let content_hash = payload_hash(
            &request.entity_type,
            &request.entity_id,
            &request.action,
            &request.actor_id,
            occurred_at,
            &request.payload,
        );
        let hash = chain_hash(&content_hash, &prev_hash);

        let record = AuditEvent {
            id: Uuid::new_v4().to_string(),
            seq,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            action: request.action,
            actor_id: request.actor_id,
            occurred_at,
            payload: request.payload,
            payload_hash: content_hash,
            prev_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditEvent>> {
        let guard = self.records.read().await;
        Self::verify_slice(&guard, GENESIS)?;
        let mut filtered = guard.clone();

        if let Some(entity_type) = filter.entity_type {
            filtered.retain(|record| record.entity_type == entity_type);
        }
        if let Some(entity_id) = filter.entity_id {
            filtered.retain(|record| record.entity_id == entity_id);
        }
        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }

    async fn verify(&self, from_seq: u64, to_seq: u64) -> VerifyResult {
        let guard = self.records.read().await;
        let range: Vec<AuditEvent> = guard
            .iter()
            .filter(|record| record.seq >= from_seq && record.seq <= to_seq)
            .cloned()
            .collect();
        let chain_start_hash = guard
            .iter()
            .filter(|record| record.seq == from_seq.saturating_sub(1))
            .map(|record| record.hash.clone())
            .next_back()
            .unwrap_or_else(|| GENESIS.to_string());
        Self::verify_slice(&range, &chain_start_hash)
    }
}
