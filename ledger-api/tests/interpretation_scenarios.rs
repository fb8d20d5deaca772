//! End-to-end interpretation scenarios (spec §8): one inbound event through
//! the full coordinator, asserted against the outcome and the posted
//! journal/trial-balance state it produces.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono::Utc;
use ledger_api::Coordinator;
use ledger_api::Selectors;
use ledger_audit::InMemoryAuditLog;
use ledger_domain::Side;
use ledger_events::EventStore;
use ledger_events::InMemoryEventStore;
use ledger_events::InMemorySchemaRegistry;
use ledger_events::IngestEnvelope;
use ledger_journal::InMemoryPeriodService;
use ledger_journal::InMemoryRoleBindingResolver;
use ledger_journal::JournalWriter;
use ledger_journal::PeriodService;
use ledger_journal::RoleBinding;
use ledger_journal::SequenceAllocator;
use ledger_outcome::InMemoryOutcomeRecorder;
use ledger_outcome::OutcomeStatus;
use ledger_policy::AmountSpec;
use ledger_policy::InMemoryDimensionSchema;
use ledger_policy::LedgerEffect;
use ledger_policy::LineRoleSpec;
use ledger_policy::MeaningSpec;
use ledger_policy::Policy;
use ledger_policy::Precedence;
use ledger_reconcile::InMemoryReconciliationService;
use ledger_reconcile::MatchProposal;
use ledger_reconcile::ReconciliationService;
use ledger_reconcile::WeightedScoringStrategy;
use ledger_snapshot::InMemoryReferenceSnapshotService;
use ledger_tenancy::Role;
use ledger_tenancy::RoleAssignment;
use ledger_tenancy::TenantContext;
use uuid::Uuid;

fn open_period() -> (NaiveDate, NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
        NaiveDate::from_ymd_opt(2026, 1, 31).expect("valid date"),
        NaiveDate::from_ymd_opt(2026, 1, 20).expect("valid date"),
    )
}

fn role_binding(ledger_id: &str, role: &str, account_id: &str) -> RoleBinding {
    RoleBinding {
        ledger_id: ledger_id.into(),
        role: role.into(),
        account_id: account_id.into(),
        coa_version: 1,
        effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
        effective_to: None,
    }
}

fn two_line_policy(event_type: &str, debit_role: &str, credit_role: &str, subledger_document_type: Option<&str>) -> Policy {
    Policy {
        id: format!("{event_type}-v1"),
        version: 1,
        event_type: event_type.into(),
        where_clause: None,
        guards: vec![],
        meaning: MeaningSpec {
            economic_type: event_type.into(),
            quantity_field: None,
            value: AmountSpec {
                amount_field: "amount".into(),
                currency_field: "currency".into(),
            },
            dimension_fields: HashMap::new(),
        },
        ledger_effects: vec![LedgerEffect {
            ledger_id: "GL".into(),
            lines: vec![
                LineRoleSpec {
                    role: debit_role.into(),
                    side: Side::Debit,
                    amount_field: None,
                    currency_field: None,
                    dimension_overrides: HashMap::new(),
                },
                LineRoleSpec {
                    role: credit_role.into(),
                    side: Side::Credit,
                    amount_field: None,
                    currency_field: None,
                    dimension_overrides: HashMap::new(),
                },
            ],
            subledger_document_type: subledger_document_type.map(String::from),
        }],
        precedence: Precedence {
            override_depth: 0,
            scope_specificity: 0,
            priority: 0,
            stable_key: format!("{event_type}-v1"),
        },
        capability_tags: HashSet::new(),
        effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
        effective_to: None,
    }
}

struct Harness {
    coordinator: Coordinator,
    selectors: Selectors,
    journal_writer: Arc<JournalWriter>,
    period_service: Arc<InMemoryPeriodService>,
    tenant: TenantContext,
}

async fn harness(policies: Vec<Policy>) -> Harness {
    let audit = InMemoryAuditLog::shared();
    let mut registry = InMemorySchemaRegistry::new();
    for policy in &policies {
        registry.register(policy.event_type.clone(), 1);
    }
    let event_store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(Arc::new(registry), audit.clone()));

    let period_service = Arc::new(InMemoryPeriodService::new());
    let (start, end, _) = open_period();
    period_service
        .open("2026-01", start, end)
        .await
        .expect("open period");

    let resolver = Arc::new(InMemoryRoleBindingResolver::new());
    for binding in [
        role_binding("GL", "EXPENSE", "6000"),
        role_binding("GL", "CONTROL_AP", "2000"),
        role_binding("GL", "CASH", "1000"),
        role_binding("GL", "ROUNDING", "9999"),
    ] {
        resolver.bind(binding).await;
    }

    let journal_writer = Arc::new(JournalWriter::new(
        audit.clone(),
        period_service.clone(),
        Arc::new(SequenceAllocator::new()),
        resolver,
    ));

    let policy_pack = Arc::new(ledger_policy::compile("pack", 1, policies).expect("pack compiles"));

    let coordinator = Coordinator::new(
        event_store,
        period_service.clone(),
        Arc::new(InMemoryReferenceSnapshotService::new("checksum-1")),
        policy_pack,
        Arc::new(InMemoryDimensionSchema::new()),
        journal_writer.clone(),
        Arc::new(InMemoryOutcomeRecorder::new()),
        audit,
        HashSet::new(),
    );

    let tenant = TenantContext::new(
        "tenant-1".into(),
        "user-1".into(),
        vec![RoleAssignment::tenant_wide(Role::Senior)],
    )
    .expect("tenant context builds");

    Harness {
        coordinator,
        selectors: Selectors::new(journal_writer.clone()),
        journal_writer,
        period_service,
        tenant,
    }
}

fn invoice_envelope(amount: &str) -> IngestEnvelope {
    IngestEnvelope {
        event_id: Uuid::new_v4(),
        event_type: "ap.invoice.received".into(),
        schema_version: 1,
        occurred_at: Utc::now(),
        effective_date: open_period().2,
        actor_id: "user-1".into(),
        producer: "ap-service".into(),
        payload: serde_json::json!({"amount": amount, "currency": "USD"}),
    }
}

#[tokio::test]
async fn ap_invoice_posts_single_currency_without_rounding() {
    let harness = harness(vec![two_line_policy(
        "ap.invoice.received",
        "EXPENSE",
        "CONTROL_AP",
        Some("ap_invoice"),
    )])
    .await;

    let response = harness
        .coordinator
        .interpret_and_post(invoice_envelope("15000.00"), &harness.tenant)
        .await
        .expect("interpretation succeeds");

    assert_eq!(response.status, OutcomeStatus::Posted);
    assert_eq!(response.journal_entry_ids.len(), 1);

    let as_of = open_period().2;
    let balances = harness.selectors.trial_balance("GL", as_of).await;
    let expense = balances
        .iter()
        .find(|balance| balance.account_id == "6000")
        .expect("expense posted");
    assert_eq!(expense.debit_minor_units, 1_500_000);
    let control_ap = balances
        .iter()
        .find(|balance| balance.account_id == "2000")
        .expect("control ap posted");
    assert_eq!(control_ap.credit_minor_units, 1_500_000);
    for entry in harness.selectors.journal_entries_for_event(response.source_event_id).await {
        assert!(entry.is_balanced());
        assert!(!entry.lines.iter().any(|line| line.is_rounding));
    }
}

#[tokio::test]
async fn ap_payment_reconciles_the_prior_invoice() {
    let harness = harness(vec![
        two_line_policy("ap.invoice.received", "EXPENSE", "CONTROL_AP", Some("ap_invoice")),
        two_line_policy("ap.payment.executed", "CONTROL_AP", "CASH", Some("ap_payment")),
    ])
    .await;

    let invoice_response = harness
        .coordinator
        .interpret_and_post(invoice_envelope("15000.00"), &harness.tenant)
        .await
        .expect("invoice posts");
    let invoice_entry = harness
        .selectors
        .journal_entry(invoice_response.journal_entry_ids[0])
        .await
        .expect("invoice entry exists");

    let payment_envelope = IngestEnvelope {
        event_id: Uuid::new_v4(),
        event_type: "ap.payment.executed".into(),
        schema_version: 1,
        occurred_at: Utc::now(),
        effective_date: open_period().2,
        actor_id: "user-1".into(),
        producer: "ap-service".into(),
        payload: serde_json::json!({"amount": "15000.00", "currency": "USD"}),
    };
    let payment_response = harness
        .coordinator
        .interpret_and_post(payment_envelope, &harness.tenant)
        .await
        .expect("payment posts");
    assert_eq!(payment_response.status, OutcomeStatus::Posted);
    let payment_entry = harness
        .selectors
        .journal_entry(payment_response.journal_entry_ids[0])
        .await
        .expect("payment entry exists");

    let reconciliation = InMemoryReconciliationService::new(Arc::new(WeightedScoringStrategy::default()));
    let session = reconciliation.create_session("GL").expect("session opens");
    let candidate = reconciliation
        .add_candidate(
            &session.id,
            MatchProposal {
                subledger_document_id: invoice_entry.id.to_string(),
                journal_entry_id: payment_entry.id.to_string(),
                amount_delta_minor: 0,
                date_delta_days: 0,
                document_description: "AP invoice V-100".into(),
                journal_description: "AP invoice V-100".into(),
                group_id: None,
            },
        )
        .expect("candidate proposed");
    let accepted = reconciliation
        .accept(&session.id, &candidate.id)
        .expect("candidate accepted");

    assert_eq!(accepted.status, ledger_reconcile::CandidateStatus::Accepted);
    let closed_session = reconciliation.session(&session.id).expect("session refetched");
    assert_eq!(closed_session.status, ledger_reconcile::SessionStatus::Closed);
}

#[tokio::test]
async fn resubmitting_an_event_id_with_a_different_payload_is_a_protocol_violation() {
    let harness = harness(vec![two_line_policy(
        "ap.invoice.received",
        "EXPENSE",
        "CONTROL_AP",
        Some("ap_invoice"),
    )])
    .await;

    let event_id = Uuid::new_v4();
    let mut first = invoice_envelope("15000.00");
    first.event_id = event_id;
    harness
        .coordinator
        .interpret_and_post(first, &harness.tenant)
        .await
        .expect("first submission posts");

    let mut second = invoice_envelope("99999.00");
    second.event_id = event_id;
    let err = harness
        .coordinator
        .interpret_and_post(second, &harness.tenant)
        .await
        .expect_err("resubmission with a different payload must fail");
    assert_eq!(err.code(), "PROTOCOL_VIOLATION");
}

#[tokio::test]
async fn posting_into_a_closed_period_is_rejected() {
    let harness = harness(vec![two_line_policy(
        "ap.invoice.received",
        "EXPENSE",
        "CONTROL_AP",
        Some("ap_invoice"),
    )])
    .await;
    harness
        .period_service
        .begin_close("2026-01", "close-run-1")
        .await
        .expect("period enters closing");
    harness
        .period_service
        .close("2026-01")
        .await
        .expect("period closes");

    let response = harness
        .coordinator
        .interpret_and_post(invoice_envelope("15000.00"), &harness.tenant)
        .await
        .expect("interpretation completes with a terminal outcome");

    assert_eq!(response.status, OutcomeStatus::Rejected);
    assert_eq!(response.reason_code.as_deref(), Some("PERIOD_CLOSED"));
    assert!(response.journal_entry_ids.is_empty());
}

#[tokio::test]
async fn a_residual_below_tolerance_posts_as_a_single_bounded_rounding_line() {
    let mut policy = two_line_policy("fx.settlement.recorded", "CASH", "EXPENSE", None);
    // A three-way split across a multi-currency FX settlement would normally
    // produce the residual; two lines reading slightly mismatched payload
    // fields exercise the same writer-side rounding path without needing a
    // third ledger-effect line.
    policy.ledger_effects[0].lines[0].amount_field = Some("debit_amount".into());
    policy.ledger_effects[0].lines[1].amount_field = Some("credit_amount".into());

    let harness = harness(vec![policy]).await;
    let envelope = IngestEnvelope {
        event_id: Uuid::new_v4(),
        event_type: "fx.settlement.recorded".into(),
        schema_version: 1,
        occurred_at: Utc::now(),
        effective_date: open_period().2,
        actor_id: "user-1".into(),
        producer: "fx-service".into(),
        payload: serde_json::json!({
            "amount": "100.00",
            "currency": "USD",
            "debit_amount": "100.00",
            "credit_amount": "99.99",
        }),
    };

    let response = harness
        .coordinator
        .interpret_and_post(envelope, &harness.tenant)
        .await
        .expect("interpretation succeeds");

    assert_eq!(response.status, OutcomeStatus::Posted);
    let entry = harness
        .selectors
        .journal_entry(response.journal_entry_ids[0])
        .await
        .expect("entry posted");
    assert!(entry.is_balanced());
    let rounding_lines: Vec<_> = entry.lines.iter().filter(|line| line.is_rounding).collect();
    assert_eq!(rounding_lines.len(), 1);
    assert_eq!(rounding_lines[0].amount_minor_units, 1);
}

#[tokio::test]
async fn a_reversed_entry_cannot_be_reversed_twice() {
    let harness = harness(vec![two_line_policy(
        "ap.invoice.received",
        "EXPENSE",
        "CONTROL_AP",
        Some("ap_invoice"),
    )])
    .await;

    // Reversal is a journal-writer operation (spec §4.5), not something the
    // coordinator's event-interpretation surface exposes; it is exercised
    // directly against the writer the harness built for the coordinator.
    let response = harness
        .coordinator
        .interpret_and_post(invoice_envelope("15000.00"), &harness.tenant)
        .await
        .expect("invoice posts");
    let entry_id = response.journal_entry_ids[0];
    let original = harness.selectors.journal_entry(entry_id).await.expect("entry exists");

    let reversal = harness
        .journal_writer
        .write_reversal(entry_id, open_period().2, "user-1".into(), Some("correction".into()))
        .await
        .expect("reversal posts");
    assert_eq!(reversal.reversal_of_id, Some(entry_id));
    for (original_line, reversal_line) in original.lines.iter().zip(reversal.lines.iter()) {
        assert_eq!(original_line.side.flip(), reversal_line.side);
        assert_eq!(original_line.amount_minor_units, reversal_line.amount_minor_units);
    }

    let second_attempt = harness
        .journal_writer
        .write_reversal(entry_id, open_period().2, "user-1".into(), Some("duplicate".into()))
        .await
        .expect_err("an already-reversed entry must reject a second reversal");
    assert_eq!(second_attempt.code(), "ALREADY_REVERSED");
}
