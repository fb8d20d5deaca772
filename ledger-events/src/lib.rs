#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Event store and ingestor (spec §4.1). Accepts immutable business events,
//! enforces idempotency by `payload_hash`, and appends to the audit log on
//! every state-affecting outcome.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use ledger_audit::AppendRequest;
use ledger_audit::AuditLog;
use ledger_domain::canonicalize;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type EventStoreResult<T> = Result<T, EventStoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("event resubmitted with a different payload: {0}")]
    ProtocolViolation(String),
    #[error("event payload failed schema validation: {0}")]
    SchemaInvalid(String),
    #[error("no active schema for event type/version: {0}/{1}")]
    UnknownEventType(String, u32),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EventStoreError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            EventStoreError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            EventStoreError::SchemaInvalid(_) => "SCHEMA_INVALID",
            EventStoreError::UnknownEventType(_, _) => "UNKNOWN_EVENT_TYPE",
            EventStoreError::Storage(_) => "STORAGE",
        }
    }
}

/// The validated inbound envelope (spec §6 "Event envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub actor_id: String,
    pub producer: String,
    pub payload: serde_json::Value,
}

/// An accepted, immutable business fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub event_id: Uuid,
    pub event_key: String,
    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub actor_id: String,
    pub producer: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub enum IngestResult {
    /// A new event row was inserted.
    AcceptedNew(BusinessEvent),
    /// The event_id already existed with an identical payload_hash; a no-op.
    AcceptedDuplicate(BusinessEvent),
}

impl IngestResult {
    #[must_use]
    pub fn event(&self) -> &BusinessEvent {
        match self {
            IngestResult::AcceptedNew(event) | IngestResult::AcceptedDuplicate(event) => event,
        }
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestResult::AcceptedDuplicate(_))
    }
}

/// Resolves whether an `(event_type, schema_version)` pair is an active,
/// recognized contract. Schema body validation beyond "is this type/version
/// known" is a business-module concern (spec §1, out of scope).
pub trait SchemaRegistry: Send + Sync {
    fn is_active(&self, event_type: &str, schema_version: u32) -> bool;
}

#[derive(Default)]
pub struct InMemorySchemaRegistry {
    active: HashSet<(String, u32)>,
}

impl InMemorySchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, schema_version: u32) -> &mut Self {
        self.active.insert((event_type.into(), schema_version));
        self
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn is_active(&self, event_type: &str, schema_version: u32) -> bool {
        self.active
            .contains(&(event_type.to_string(), schema_version))
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn ingest(&self, envelope: IngestEnvelope) -> EventStoreResult<IngestResult>;

    async fn get(&self, event_id: Uuid) -> EventStoreResult<Option<BusinessEvent>>;
}

fn compute_payload_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(payload).as_bytes());
    format!("{:x}", hasher.finalize())
}

struct State {
    events: HashMap<Uuid, BusinessEvent>,
    last_hash: String,
}

/// In-memory reference implementation. Production deployments back this
/// with a table carrying a unique constraint on `event_id`; the in-memory
/// map plays that role here via `HashMap::entry`.
pub struct InMemoryEventStore {
    state: RwLock<State>,
    schema_registry: Arc<dyn SchemaRegistry>,
    audit: Arc<dyn AuditLog>,
}

impl InMemoryEventStore {
    #[must_use]
    pub fn new(schema_registry: Arc<dyn SchemaRegistry>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            state: RwLock::new(State {
                events: HashMap::new(),
                last_hash: ledger_audit::GENESIS.to_string(),
            }),
            schema_registry,
            audit,
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn ingest(&self, envelope: IngestEnvelope) -> EventStoreResult<IngestResult> {
        if !self
            .schema_registry
            .is_active(&envelope.event_type, envelope.schema_version)
        {
            return Err(EventStoreError::UnknownEventType(
                envelope.event_type,
                envelope.schema_version,
            ));
        }

        let payload_hash = compute_payload_hash(&envelope.payload);

        let mut guard = self.state.write().await;
        if let Some(existing) = guard.events.get(&envelope.event_id) {
            if existing.payload_hash == payload_hash {
                return Ok(IngestResult::AcceptedDuplicate(existing.clone()));
            }
            let existing_hash = existing.payload_hash.clone();
            drop(guard);
            self.audit
                .append(AppendRequest {
                    entity_type: "business_event".into(),
                    entity_id: envelope.event_id.to_string(),
                    action: "PROTOCOL_VIOLATION".into(),
                    actor_id: envelope.actor_id.clone(),
                    payload: serde_json::json!({
                        "event_type": envelope.event_type,
                        "existing_payload_hash": existing_hash,
                        "rejected_payload_hash": payload_hash,
                    }),
                })
                .await
                .map_err(|e| EventStoreError::Storage(e.to_string()))?;
            return Err(EventStoreError::ProtocolViolation(format!(
                "event_id {} previously accepted with a different payload",
                envelope.event_id
            )));
        }

        let prev_hash = guard.last_hash.clone();
        let hash = ledger_audit::chain_hash(&payload_hash, &prev_hash);
        let event = BusinessEvent {
            event_id: envelope.event_id,
            event_key: envelope.event_id.to_string(),
            event_type: envelope.event_type,
            schema_version: envelope.schema_version,
            occurred_at: envelope.occurred_at,
            ingested_at: Utc::now(),
            effective_date: envelope.effective_date,
            actor_id: envelope.actor_id.clone(),
            producer: envelope.producer,
            payload: envelope.payload,
            payload_hash,
            prev_hash,
            hash: hash.clone(),
        };

        guard.events.insert(event.event_id, event.clone());
        guard.last_hash = hash;
        drop(guard);

        self.audit
            .append(AppendRequest {
                entity_type: "business_event".into(),
                entity_id: event.event_id.to_string(),
                action: "INGESTED".into(),
                actor_id: event.actor_id.clone(),
                payload: serde_json::json!({
                    "event_type": event.event_type,
                    "payload_hash": event.payload_hash,
                }),
            })
            .await
            .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(IngestResult::AcceptedNew(event))
    }

    async fn get(&self, event_id: Uuid) -> EventStoreResult<Option<BusinessEvent>> {
        let guard = self.state.read().await;
        Ok(guard.events.get(&event_id).cloned())
    }
}
