//! Compiled, indexed policy set (spec §4.3, §9 "global mutable registries
//! → compiled immutable pack"). A `CompiledPolicyPack` is produced once by
//! [`compile`] from author-supplied [`Policy`] fragments and handed to
//! services as a frozen, `Arc`-shared value — there is no mutable registry
//! on the hot path.

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::ast::eval_bool;
use crate::ast::Expr;
use crate::meaning::MeaningSpec;
use crate::GuardAction;
use crate::PolicyError;
use crate::PolicyResult;

/// `(override_depth, scope_specificity, priority, stable_key)` — ranked
/// lexicographically, highest wins. `stable_key` breaks ties between
/// otherwise-equal tuples deterministically at compile time but two
/// policies sharing every component including `stable_key` is itself a
/// compile error (ambiguous pack).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Precedence {
    pub override_depth: i32,
    pub scope_specificity: i32,
    pub priority: i32,
    pub stable_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    pub action: GuardAction,
    pub condition: Expr,
    pub reason_code: String,
    pub reason_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEffect {
    pub ledger_id: String,
    pub lines: Vec<crate::meaning::LineRoleSpec>,
    /// Declares, at compile time, the subledger document type this ledger
    /// effect produces entries for (spec §9's open question on
    /// `source_document_type` derivation) — `None` if this ledger effect
    /// does not touch a subledger.
    pub subledger_document_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub version: u32,
    pub event_type: String,
    pub where_clause: Option<Expr>,
    pub guards: Vec<Guard>,
    pub meaning: MeaningSpec,
    pub ledger_effects: Vec<LedgerEffect>,
    pub precedence: Precedence,
    pub capability_tags: HashSet<String>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl Policy {
    #[must_use]
    pub fn is_effective(&self, as_of: NaiveDate) -> bool {
        if as_of < self.effective_from {
            return false;
        }
        match self.effective_to {
            Some(to) => as_of <= to,
            None => true,
        }
    }

    #[must_use]
    pub fn capabilities_satisfied(&self, enabled: &HashSet<String>) -> bool {
        self.capability_tags.is_subset(enabled)
    }

    pub fn where_matches(&self, payload: &serde_json::Value) -> PolicyResult<bool> {
        match &self.where_clause {
            Some(expr) => eval_bool(expr, payload),
            None => Ok(true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledPolicyPack {
    pub config_id: String,
    pub version: u32,
    pub checksum: String,
    pub policies: Vec<Policy>,
    index: HashMap<String, Vec<usize>>,
}

impl CompiledPolicyPack {
    #[must_use]
    pub fn policies_for(&self, event_type: &str) -> Vec<&Policy> {
        self.index
            .get(event_type)
            .into_iter()
            .flatten()
            .map(|&i| &self.policies[i])
            .collect()
    }
}

fn checksum_of(config_id: &str, version: u32, policies: &[Policy]) -> PolicyResult<String> {
    let canonical = serde_json::to_value(policies)
        .map_err(|e| PolicyError::Compile(format!("policies must serialize: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(config_id.as_bytes());
    hasher.update(version.to_be_bytes());
    hasher.update(ledger_domain::canonicalize(&canonical).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compiles author-supplied policy fragments into a frozen pack, failing if
/// two policies for the same `event_type` could ever tie on precedence —
/// per spec §4.3, "the compile step guarantees that for every
/// `(event_type, payload-shape, effective window, capability set)`
/// combination, at most one policy survives."
///
/// This is a necessary, not sufficient, static check: two policies with
/// disjoint `where_clause`s can share a precedence tuple safely, because
/// they never compete for the same event at runtime. We reject the
/// conservative superset (identical tuple within the same `event_type`,
/// regardless of where-clause) rather than attempt where-clause
/// satisfiability analysis, matching the guard AST's deliberately
/// restricted expressiveness.
pub fn compile(config_id: impl Into<String>, version: u32, policies: Vec<Policy>) -> PolicyResult<CompiledPolicyPack> {
    let config_id = config_id.into();
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    let mut seen_tuples: HashMap<&str, HashSet<Precedence>> = HashMap::new();

    for (i, policy) in policies.iter().enumerate() {
        let tuples = seen_tuples.entry(policy.event_type.as_str()).or_default();
        if !tuples.insert(policy.precedence.clone()) {
            return Err(PolicyError::Compile(format!(
                "policy {} duplicates a precedence tuple already used for event_type {}",
                policy.id, policy.event_type
            )));
        }
        index
            .entry(policy.event_type.clone())
            .or_default()
            .push(i);
    }

    let checksum = checksum_of(&config_id, version, &policies)?;

    Ok(CompiledPolicyPack {
        config_id,
        version,
        checksum,
        policies,
        index,
    })
}

// `Precedence` needs `Hash` for the compile-time dedup check above, but we
// don't want callers comparing float priorities with `==` elsewhere, so the
// derive lives here, next to the one place it's used, rather than on the
// public type definition.
impl std::hash::Hash for Precedence {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.override_depth.hash(state);
        self.scope_specificity.hash(state);
        self.priority.hash(state);
        self.stable_key.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectResult<'a> {
    Selected(&'a Policy),
    NoMatch,
    Ambiguous,
}

/// Deterministic policy selection (spec §4.3 algorithm 1–5).
pub fn select<'a>(
    pack: &'a CompiledPolicyPack,
    event_type: &str,
    payload: &serde_json::Value,
    as_of: NaiveDate,
    enabled_capabilities: &HashSet<String>,
) -> PolicyResult<SelectResult<'a>> {
    let mut candidates = Vec::new();
    for policy in pack.policies_for(event_type) {
        if !policy.where_matches(payload)? {
            continue;
        }
        if !policy.is_effective(as_of) {
            continue;
        }
        if !policy.capabilities_satisfied(enabled_capabilities) {
            continue;
        }
        candidates.push(policy);
    }

    if candidates.is_empty() {
        return Ok(SelectResult::NoMatch);
    }

    candidates.sort_by(|a, b| b.precedence.cmp(&a.precedence));
    if candidates.len() > 1 && candidates[0].precedence == candidates[1].precedence {
        return Ok(SelectResult::Ambiguous);
    }

    Ok(SelectResult::Selected(candidates[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meaning::AmountSpec;
    use crate::meaning::MeaningSpec;
    use pretty_assertions::assert_eq;

    fn base_policy(id: &str, stable_key: &str, priority: i32) -> Policy {
        Policy {
            id: id.into(),
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
                dimension_fields: HashMap::new(),
            },
            ledger_effects: vec![],
            precedence: Precedence {
                override_depth: 0,
                scope_specificity: 0,
                priority,
                stable_key: stable_key.into(),
            },
            capability_tags: HashSet::new(),
            effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
            effective_to: None,
        }
    }

    #[test]
    fn compile_rejects_duplicate_precedence_tuples() {
        let a = base_policy("a", "same", 1);
        let b = base_policy("b", "same", 1);
        let err = compile("pack", 1, vec![a, b]).expect_err("duplicate tuple must fail");
        assert!(matches!(err, PolicyError::Compile(_)));
    }

    #[test]
    fn select_picks_highest_precedence() {
        let low = base_policy("low", "low", 1);
        let high = base_policy("high", "high", 10);
        let pack = compile("pack", 1, vec![low, high]).expect("compiles");

        let result = select(
            &pack,
            "ap.invoice.received",
            &serde_json::json!({}),
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            &HashSet::new(),
        )
        .expect("select succeeds");

        match result {
            SelectResult::Selected(policy) => assert_eq!(policy.id, "high"),
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn select_returns_no_match_for_unknown_event_type() {
        let pack = compile("pack", 1, vec![base_policy("a", "a", 1)]).expect("compiles");
        let result = select(
            &pack,
            "ar.invoice.issued",
            &serde_json::json!({}),
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            &HashSet::new(),
        )
        .expect("select succeeds");
        assert_eq!(result, SelectResult::NoMatch);
    }

    #[test]
    fn select_filters_by_effective_window() {
        let mut expired = base_policy("expired", "expired", 1);
        expired.effective_to = Some(NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"));
        let pack = compile("pack", 1, vec![expired]).expect("compiles");

        let result = select(
            &pack,
            "ap.invoice.received",
            &serde_json::json!({}),
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            &HashSet::new(),
        )
        .expect("select succeeds");
        assert_eq!(result, SelectResult::NoMatch);
    }

    #[test]
    fn select_requires_capability_subset() {
        let mut gated = base_policy("gated", "gated", 1);
        gated.capability_tags.insert("beta_rounding".into());
        let pack = compile("pack", 1, vec![gated]).expect("compiles");

        let without = select(
            &pack,
            "ap.invoice.received",
            &serde_json::json!({}),
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            &HashSet::new(),
        )
        .expect("select succeeds");
        assert_eq!(without, SelectResult::NoMatch);

        let mut enabled = HashSet::new();
        enabled.insert("beta_rounding".to_string());
        let with = select(
            &pack,
            "ap.invoice.received",
            &serde_json::json!({}),
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            &enabled,
        )
        .expect("select succeeds");
        assert!(matches!(with, SelectResult::Selected(_)));
    }
}
