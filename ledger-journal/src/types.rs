//! Journal data model (spec §3): `JournalEntry`, `JournalLine`, and the
//! reference-snapshot fields every posted entry carries for deterministic
//! replay (R21).

use std::collections::HashMap;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use ledger_domain::CurrencyCode;
use ledger_domain::Side;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Draft,
    Posted,
}

/// Version identifiers of the reference data in effect when an entry was
/// written — captured once by the reference-snapshot service and copied
/// verbatim onto every entry it governs (R21).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSnapshot {
    pub coa_version: u32,
    pub dimension_schema_version: u32,
    pub currency_registry_version: u32,
    pub rounding_policy_version: u32,
    pub config_checksum: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: Uuid,
    pub journal_entry_id: Uuid,
    pub line_seq: u32,
    pub account_id: String,
    pub side: Side,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub dimensions: HashMap<String, String>,
    pub exchange_rate_id: Option<String>,
    pub is_rounding: bool,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub ledger_id: String,
    pub source_event_id: Uuid,
    pub effective_date: NaiveDate,
    pub posted_at: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    pub seq: u64,
    pub idempotency_key: String,
    pub reversal_of_id: Option<Uuid>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub snapshot: ReferenceSnapshot,
    pub prev_hash: String,
    pub hash: String,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    #[must_use]
    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }

    /// Σ debits and Σ credits per currency present in this entry's lines.
    #[must_use]
    pub fn balances_by_currency(&self) -> HashMap<CurrencyCode, (i64, i64)> {
        let mut totals: HashMap<CurrencyCode, (i64, i64)> = HashMap::new();
        for line in &self.lines {
            let entry = totals.entry(line.currency.clone()).or_insert((0, 0));
            match line.side {
                Side::Debit => entry.0 += line.amount_minor_units,
                Side::Credit => entry.1 += line.amount_minor_units,
            }
        }
        totals
    }

    /// R4: debits equal credits, exactly, per currency.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.balances_by_currency()
            .values()
            .all(|(debit, credit)| debit == credit)
    }

    /// R5/R22: at most one rounding line, and its amount bounded relative
    /// to the number of non-rounding lines.
    #[must_use]
    pub fn rounding_invariant_holds(&self) -> bool {
        let rounding_lines: Vec<&JournalLine> =
            self.lines.iter().filter(|line| line.is_rounding).collect();
        if rounding_lines.len() > 1 {
            return false;
        }
        let non_rounding_count = (self.lines.len() - rounding_lines.len()) as i64;
        rounding_lines
            .first()
            .is_none_or(|line| line.amount_minor_units <= non_rounding_count)
    }
}

/// Symbolic role -> concrete account, effective-dated per ledger (spec
/// §4.5 step 3, "role resolution").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub ledger_id: String,
    pub role: String,
    pub account_id: String,
    pub coa_version: u32,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl RoleBinding {
    #[must_use]
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        as_of >= self.effective_from && self.effective_to.is_none_or(|to| as_of <= to)
    }
}
