//! Read-model selectors (spec §10.5): trial balance, canonical ledger hash
//! (R24), and journal/subledger lookups built entirely on the journal
//! writer's posted state — no separate read store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use ledger_audit::chain_hash;
use ledger_audit::GENESIS;
use ledger_domain::canonicalize;
use ledger_domain::CurrencyCode;
use ledger_domain::Side;
use ledger_journal::JournalEntry;
use ledger_journal::JournalWriter;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

/// One account's posted debit/credit totals, in one currency, as of a date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub account_id: String,
    pub currency: CurrencyCode,
    pub debit_minor_units: i64,
    pub credit_minor_units: i64,
}

impl AccountBalance {
    #[must_use]
    pub fn net_minor_units(&self) -> i64 {
        self.debit_minor_units - self.credit_minor_units
    }
}

pub struct Selectors {
    journal_writer: Arc<JournalWriter>,
}

fn entry_content_hash(entry: &JournalEntry) -> String {
    let value = serde_json::json!({
        "id": entry.id,
        "ledger_id": entry.ledger_id,
        "seq": entry.seq,
        "lines": entry.lines.iter().map(|line| serde_json::json!({
            "account_id": line.account_id,
            "side": line.side,
            "amount_minor_units": line.amount_minor_units,
            "currency": line.currency,
            "is_rounding": line.is_rounding,
        })).collect::<Vec<_>>(),
    });
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(&value).as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Selectors {
    #[must_use]
    pub fn new(journal_writer: Arc<JournalWriter>) -> Self {
        Self { journal_writer }
    }

    /// Σ debits and Σ credits per `(account_id, currency)`, over posted
    /// entries in one ledger with `effective_date <= as_of`.
    pub async fn trial_balance(&self, ledger_id: &str, as_of: NaiveDate) -> Vec<AccountBalance> {
        let entries = self.journal_writer.list_posted(ledger_id).await;
        let mut totals: BTreeMap<(String, CurrencyCode), (i64, i64)> = BTreeMap::new();
        for entry in entries.iter().filter(|entry| entry.effective_date <= as_of) {
            for line in &entry.lines {
                let key = (line.account_id.clone(), line.currency.clone());
                let balance = totals.entry(key).or_insert((0, 0));
                match line.side {
                    Side::Debit => balance.0 += line.amount_minor_units,
                    Side::Credit => balance.1 += line.amount_minor_units,
                }
            }
        }
        totals
            .into_iter()
            .map(|((account_id, currency), (debit, credit))| AccountBalance {
                account_id,
                currency,
                debit_minor_units: debit,
                credit_minor_units: credit,
            })
            .collect()
    }

    /// Deterministic hash over the posted entries in `[from_seq, to_seq]`
    /// for one ledger (R24): a fresh `GENESIS`-rooted chain over just that
    /// range, independent of the ledger's full prior history, so the same
    /// range always re-derives the same value regardless of what precedes
    /// it. Reuses the same `chain_hash`/`canonicalize` primitives the audit
    /// log and the journal writer's own per-ledger chain use.
    pub async fn canonical_ledger_hash(&self, ledger_id: &str, from_seq: u64, to_seq: u64) -> Option<String> {
        let entries = self.journal_writer.list_posted(ledger_id).await;
        let mut in_range: Vec<&JournalEntry> = entries
            .iter()
            .filter(|entry| entry.seq >= from_seq && entry.seq <= to_seq)
            .collect();
        if in_range.is_empty() {
            return None;
        }
        in_range.sort_by_key(|entry| entry.seq);

        let mut running = GENESIS.to_string();
        for entry in in_range {
            running = chain_hash(&entry_content_hash(entry), &running);
        }
        Some(running)
    }

    pub async fn journal_entry(&self, entry_id: Uuid) -> Option<JournalEntry> {
        self.journal_writer.get(entry_id).await
    }

    pub async fn journal_entries_for_event(&self, source_event_id: Uuid) -> Vec<JournalEntry> {
        self.journal_writer.get_by_source_event(source_event_id).await
    }

    /// Net posted balance (debits minus credits) across one ledger's posted
    /// entries for lines carrying `dimension == value`, in one currency —
    /// the subledger-aggregate read a reconciliation session checks a
    /// control account against.
    pub async fn subledger_aggregate(
        &self,
        ledger_id: &str,
        dimension: &str,
        value: &str,
        currency: &CurrencyCode,
    ) -> i64 {
        let entries = self.journal_writer.list_posted(ledger_id).await;
        let mut net = 0i64;
        for entry in &entries {
            for line in &entry.lines {
                if &line.currency != currency {
                    continue;
                }
                if line.dimensions.get(dimension).map(String::as_str) != Some(value) {
                    continue;
                }
                net += match line.side {
                    Side::Debit => line.amount_minor_units,
                    Side::Credit => -line.amount_minor_units,
                };
            }
        }
        net
    }
}
