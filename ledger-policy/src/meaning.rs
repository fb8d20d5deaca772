//! Meaning builder (spec §4.4): evaluates guards, extracts dimensions, and
//! turns a selected policy plus a business event into an `AccountingIntent`
//! expressed in symbolic roles — COA resolution happens later, in the
//! journal writer.

use std::collections::HashMap;
use std::collections::HashSet;

use ledger_domain::CurrencyCode;
use ledger_domain::Money;
use ledger_domain::Side;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::ast::eval;
use crate::ast::eval_bool;
use crate::ast::Expr;
use crate::pack::LedgerEffect;
use crate::pack::Policy;
use crate::GuardAction;
use crate::PolicyError;
use crate::PolicyResult;

/// Where to read `economic_type`/`quantity`/`value` from a matched payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeaningSpec {
    pub economic_type: String,
    pub quantity_field: Option<String>,
    pub value: AmountSpec,
    /// Dimension name -> field path extracting its value from the payload.
    pub dimension_fields: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountSpec {
    pub amount_field: String,
    pub currency_field: String,
}

/// One line of a ledger effect, in role terms. `side`/`role` are fixed by
/// the policy; `amount_field` lets a line reference a different payload
/// field than the meaning's headline `value` (e.g. a fee line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRoleSpec {
    pub role: String,
    pub side: Side,
    pub amount_field: Option<String>,
    pub currency_field: Option<String>,
    pub dimension_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LineSpec {
    pub role: String,
    pub side: Side,
    pub money: Money,
    pub dimensions: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LedgerIntent {
    pub ledger_id: String,
    pub lines: Vec<LineSpec>,
    pub subledger_document_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountingIntent {
    pub source_event_id: Uuid,
    pub economic_type: String,
    pub quantity: Option<f64>,
    pub value: Option<Money>,
    pub dimensions: HashMap<String, String>,
    pub policy_id: String,
    pub policy_version: u32,
    pub ledger_intents: Vec<LedgerIntent>,
}

#[derive(Debug, Clone)]
pub enum MeaningResult {
    Posting(AccountingIntent),
    Blocked { reason_code: String, detail: Option<String> },
    Rejected { reason_code: String, detail: Option<String> },
    NonPosting { reason_code: String },
}

/// Checks whether `(dimension, value)` is a permitted combination. A
/// business-module concern (which dimensions exist, which values are
/// active) — the kernel only enforces that the meaning builder does not
/// silently invent untracked dimensions.
pub trait DimensionSchema: Send + Sync {
    fn is_allowed(&self, dimension: &str, value: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryDimensionSchema {
    allowed: HashMap<String, HashSet<String>>,
}

impl InMemoryDimensionSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, dimension: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.allowed
            .entry(dimension.into())
            .or_default()
            .insert(value.into());
        self
    }
}

impl DimensionSchema for InMemoryDimensionSchema {
    fn is_allowed(&self, dimension: &str, value: &str) -> bool {
        self.allowed
            .get(dimension)
            .is_some_and(|values| values.contains(value))
    }
}

fn field_str(payload: &serde_json::Value, path: &str) -> PolicyResult<Option<String>> {
    let value = eval(&Expr::field(path), payload)?;
    Ok(match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn field_amount(payload: &serde_json::Value, spec: &AmountSpec) -> PolicyResult<Option<Money>> {
    let amount = eval(&Expr::field(&spec.amount_field), payload)?;
    if amount.is_null() {
        return Ok(None);
    }
    let minor_units = parse_minor_units(&amount)?;
    let currency_raw = field_str(payload, &spec.currency_field)?.ok_or_else(|| {
        PolicyError::MeaningExtraction(format!(
            "currency field `{}` missing from payload",
            spec.currency_field
        ))
    })?;
    let currency = CurrencyCode::new(currency_raw)
        .map_err(|e| PolicyError::MeaningExtraction(e.to_string()))?;
    let money = Money::new(minor_units, currency)
        .map_err(|e| PolicyError::MeaningExtraction(e.to_string()))?;
    Ok(Some(money))
}

/// Parses a decimal amount (string or number, as authored in an event
/// payload, e.g. `"15000.00"`) into integer minor units. Two decimal places
/// is assumed unless the source carries more; this mirrors how the journal
/// writer and every hash site downstream represent money (`ledger-domain`).
fn parse_minor_units(value: &serde_json::Value) -> PolicyResult<i64> {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(PolicyError::MeaningExtraction(format!(
                "amount must be a string or number, got {other}"
            )));
        }
    };
    let mut parts = raw.splitn(2, '.');
    let whole = parts.next().unwrap_or("0");
    let frac = parts.next().unwrap_or("");
    let negative = whole.starts_with('-');
    let whole_digits: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
    let mut frac_digits: String = frac.chars().filter(|c| c.is_ascii_digit()).collect();
    frac_digits.truncate(2);
    while frac_digits.len() < 2 {
        frac_digits.push('0');
    }
    let whole_value: i64 = whole_digits.parse().map_err(|_| {
        PolicyError::MeaningExtraction(format!("could not parse amount `{raw}`"))
    })?;
    let frac_value: i64 = frac_digits.parse().map_err(|_| {
        PolicyError::MeaningExtraction(format!("could not parse amount `{raw}`"))
    })?;
    let magnitude = whole_value
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| PolicyError::MeaningExtraction("amount overflow".into()))?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Evaluates guards in declared order (first REJECT wins, then first
/// BLOCK), extracts economic meaning, and builds ledger intents from the
/// policy's declared line roles.
pub fn build(
    policy: &Policy,
    source_event_id: Uuid,
    payload: &serde_json::Value,
    dimension_schema: &dyn DimensionSchema,
) -> PolicyResult<MeaningResult> {
    for guard in &policy.guards {
        if eval_bool(&guard.condition, payload)? {
            return Ok(match guard.action {
                GuardAction::Reject => MeaningResult::Rejected {
                    reason_code: guard.reason_code.clone(),
                    detail: guard.reason_detail.clone(),
                },
                GuardAction::Block => MeaningResult::Blocked {
                    reason_code: guard.reason_code.clone(),
                    detail: guard.reason_detail.clone(),
                },
            });
        }
    }

    let quantity = match &policy.meaning.quantity_field {
        Some(path) => eval(&Expr::field(path), payload)?.as_f64(),
        None => None,
    };
    let value = field_amount(payload, &policy.meaning.value)?;

    let mut dimensions = HashMap::new();
    for (name, path) in &policy.meaning.dimension_fields {
        if let Some(extracted) = field_str(payload, path)? {
            if !dimension_schema.is_allowed(name, &extracted) {
                return Ok(MeaningResult::Rejected {
                    reason_code: "DIMENSION_VALUE_NOT_ALLOWED".into(),
                    detail: Some(format!("{name}={extracted} is not an active dimension value")),
                });
            }
            dimensions.insert(name.clone(), extracted);
        }
    }

    let mut ledger_intents = Vec::with_capacity(policy.ledger_effects.len());
    for effect in &policy.ledger_effects {
        ledger_intents.push(build_ledger_intent(effect, payload, &policy.meaning, &dimensions)?);
    }

    Ok(MeaningResult::Posting(AccountingIntent {
        source_event_id,
        economic_type: policy.meaning.economic_type.clone(),
        quantity,
        value,
        dimensions,
        policy_id: policy.id.clone(),
        policy_version: policy.version,
        ledger_intents,
    }))
}

fn build_ledger_intent(
    effect: &LedgerEffect,
    payload: &serde_json::Value,
    meaning: &MeaningSpec,
    base_dimensions: &HashMap<String, String>,
) -> PolicyResult<LedgerIntent> {
    let mut lines = Vec::with_capacity(effect.lines.len());
    for line in &effect.lines {
        let amount_field = line
            .amount_field
            .as_deref()
            .unwrap_or(&meaning.value.amount_field);
        let currency_field = line
            .currency_field
            .as_deref()
            .unwrap_or(&meaning.value.currency_field);
        let money = field_amount(
            payload,
            &AmountSpec {
                amount_field: amount_field.to_string(),
                currency_field: currency_field.to_string(),
            },
        )?
        .ok_or_else(|| {
            PolicyError::MeaningExtraction(format!(
                "role {} has no resolvable amount at field `{amount_field}`",
                line.role
            ))
        })?;

        let mut dimensions = base_dimensions.clone();
        dimensions.extend(line.dimension_overrides.clone());

        lines.push(LineSpec {
            role: line.role.clone(),
            side: line.side,
            money,
            dimensions,
        });
    }

    Ok(LedgerIntent {
        ledger_id: effect.ledger_id.clone(),
        lines,
        subledger_document_type: effect.subledger_document_type.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::Precedence;
    use crate::Guard;

    fn invoice_policy() -> Policy {
        Policy {
            id: "ap-invoice-v1".into(),
            version: 1,
            event_type: "ap.invoice.received".into(),
            where_clause: None,
            guards: vec![],
            meaning: MeaningSpec {
                economic_type: "ap_invoice".into(),
                quantity_field: None,
                value: AmountSpec {
                    amount_field: "amount".into(),
                    currency_field: "currency".into(),
                },
                dimension_fields: HashMap::from([("vendor".into(), "vendor_id".into())]),
            },
            ledger_effects: vec![LedgerEffect {
                ledger_id: "GL".into(),
                lines: vec![
                    LineRoleSpec {
                        role: "EXPENSE".into(),
                        side: Side::Debit,
                        amount_field: None,
                        currency_field: None,
                        dimension_overrides: HashMap::new(),
                    },
                    LineRoleSpec {
                        role: "CONTROL_AP".into(),
                        side: Side::Credit,
                        amount_field: None,
                        currency_field: None,
                        dimension_overrides: HashMap::new(),
                    },
                ],
                subledger_document_type: Some("ap_invoice".into()),
            }],
            precedence: Precedence {
                override_depth: 0,
                scope_specificity: 0,
                priority: 0,
                stable_key: "ap-invoice-v1".into(),
            },
            capability_tags: HashSet::new(),
            effective_from: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
            effective_to: None,
        }
    }

    #[test]
    fn builds_intent_with_two_balanced_lines() {
        let schema = {
            let mut schema = InMemoryDimensionSchema::new();
            schema.allow("vendor", "V-100");
            schema
        };
        let payload = serde_json::json!({
            "vendor_id": "V-100",
            "amount": "15000.00",
            "currency": "USD",
        });

        let result = build(&invoice_policy(), Uuid::new_v4(), &payload, &schema)
            .expect("build succeeds");

        match result {
            MeaningResult::Posting(intent) => {
                assert_eq!(intent.ledger_intents.len(), 1);
                let lines = &intent.ledger_intents[0].lines;
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[0].money.minor_units, 1_500_000);
                assert_eq!(lines[1].money.minor_units, 1_500_000);
                assert_eq!(lines[0].side, Side::Debit);
                assert_eq!(lines[1].side, Side::Credit);
            }
            other => panic!("expected Posting, got {other:?}"),
        }
    }

    #[test]
    fn first_matching_reject_guard_short_circuits() {
        let mut policy = invoice_policy();
        policy.guards.push(Guard {
            action: GuardAction::Reject,
            condition: Expr::literal(serde_json::json!(true)),
            reason_code: "ALWAYS_REJECT".into(),
            reason_detail: None,
        });

        let schema = InMemoryDimensionSchema::new();
        let payload = serde_json::json!({"vendor_id": "V-100", "amount": "1.00", "currency": "USD"});
        let result = build(&policy, Uuid::new_v4(), &payload, &schema).expect("build succeeds");

        assert!(matches!(result, MeaningResult::Rejected { .. }));
    }

    #[test]
    fn rejects_disallowed_dimension_value() {
        let schema = InMemoryDimensionSchema::new();
        let payload = serde_json::json!({"vendor_id": "V-999", "amount": "1.00", "currency": "USD"});
        let result = build(&invoice_policy(), Uuid::new_v4(), &payload, &schema)
            .expect("build succeeds");
        assert!(matches!(result, MeaningResult::Rejected { .. }));
    }

    #[test]
    fn parse_minor_units_handles_whole_and_fractional() {
        assert_eq!(parse_minor_units(&serde_json::json!("15000.00")).expect("parses"), 1_500_000);
        assert_eq!(parse_minor_units(&serde_json::json!("0.01")).expect("parses"), 1);
        assert_eq!(parse_minor_units(&serde_json::json!(-5)).expect("parses"), -500);
    }
}
