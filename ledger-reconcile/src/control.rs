//! Subledger control-balance check (spec §4.7, G9/SL-G3): before a journal
//! entry touching a subledger document posts, its control-account lines
//! must agree with the subledger's own running balance for that account,
//! within tolerance. Kept synchronous like its teacher, wrapped in an
//! `async fn` only to satisfy the writer's trait seam.

use std::collections::HashMap;
use std::sync::RwLock;

use ledger_journal::JournalLine;
use ledger_journal::SubledgerControl;
use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error(
        "control balance mismatch on {ledger_id}/{account_id}: subledger {subledger_total} vs control lines {control_total}, tolerance {tolerance}"
    )]
    Mismatch {
        ledger_id: String,
        account_id: String,
        subledger_total: i64,
        control_total: i64,
        tolerance: i64,
    },
}

/// Running subledger balance per `(ledger_id, control_account_id)`, kept by
/// whatever posts subledger-facing entries (AP/AR/fixed-assets modules).
/// The checker compares this against what a candidate journal entry would
/// add to the GL control account before the entry is allowed to post.
pub struct ControlBalanceChecker {
    tolerance_minor_units: i64,
    subledger_balances: RwLock<HashMap<(String, String), i64>>,
}

impl ControlBalanceChecker {
    #[must_use]
    pub fn new(tolerance_minor_units: i64) -> Self {
        Self {
            tolerance_minor_units,
            subledger_balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_subledger_balance(&self, ledger_id: &str, account_id: &str, balance: i64) {
        if let Ok(mut guard) = self.subledger_balances.write() {
            guard.insert((ledger_id.to_string(), account_id.to_string()), balance);
        }
    }

    fn control_total(lines: &[JournalLine], account_id: &str) -> i64 {
        lines
            .iter()
            .filter(|line| line.account_id == account_id)
            .map(|line| match line.side {
                ledger_domain::Side::Debit => line.amount_minor_units,
                ledger_domain::Side::Credit => -line.amount_minor_units,
            })
            .sum()
    }

    fn check_sync(&self, ledger_id: &str, lines: &[JournalLine]) -> ControlResult<()> {
        let guard = self
            .subledger_balances
            .read()
            .map_err(|_| ControlError::Storage("control balance store poisoned".into()))?;

        let touched_accounts: Vec<&str> = {
            let mut accounts: Vec<&str> = lines.iter().map(|l| l.account_id.as_str()).collect();
            accounts.sort_unstable();
            accounts.dedup();
            accounts
        };

        for account_id in touched_accounts {
            let Some(&subledger_total) = guard.get(&(ledger_id.to_string(), account_id.to_string())) else {
                continue;
            };
            let control_total = Self::control_total(lines, account_id);
            let delta = (subledger_total - control_total).abs();
            if delta > self.tolerance_minor_units {
                return Err(ControlError::Mismatch {
                    ledger_id: ledger_id.to_string(),
                    account_id: account_id.to_string(),
                    subledger_total,
                    control_total,
                    tolerance: self.tolerance_minor_units,
                });
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubledgerControl for ControlBalanceChecker {
    async fn check(
        &self,
        _document_type: &str,
        ledger_id: &str,
        lines: &[JournalLine],
    ) -> Result<(), String> {
        self.check_sync(ledger_id, lines).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use ledger_domain::CurrencyCode;
    use ledger_domain::Side;
    use uuid::Uuid;

    use super::*;

    fn line(account_id: &str, side: Side, amount: i64) -> JournalLine {
        JournalLine {
            id: Uuid::new_v4(),
            journal_entry_id: Uuid::new_v4(),
            line_seq: 0,
            account_id: account_id.into(),
            side,
            amount_minor_units: amount,
            currency: CurrencyCode::new("USD").expect("valid currency"),
            dimensions: HashMap::new(),
            exchange_rate_id: None,
            is_rounding: false,
            memo: None,
        }
    }

    #[test]
    fn within_tolerance_passes() {
        let checker = ControlBalanceChecker::new(100);
        checker.set_subledger_balance("GL", "2000", 150_000);
        let lines = vec![line("2000", Side::Credit, 150_050)];
        checker.check_sync("GL", &lines).expect("within tolerance");
    }

    #[test]
    fn outside_tolerance_fails() {
        let checker = ControlBalanceChecker::new(100);
        checker.set_subledger_balance("GL", "2000", 150_000);
        let lines = vec![line("2000", Side::Credit, 160_000)];
        let err = checker.check_sync("GL", &lines).expect_err("must mismatch");
        assert!(matches!(err, ControlError::Mismatch { .. }));
    }

    #[test]
    fn untracked_account_is_skipped() {
        let checker = ControlBalanceChecker::new(0);
        let lines = vec![line("9999", Side::Debit, 42)];
        checker.check_sync("GL", &lines).expect("no tracked balance to compare");
    }

    #[tokio::test]
    async fn trait_impl_delegates_to_sync_check() {
        let checker = ControlBalanceChecker::new(0);
        checker.set_subledger_balance("GL", "2000", 100);
        let lines = vec![line("2000", Side::Credit, 100)];
        SubledgerControl::check(&checker, "ap_invoice", "GL", &lines)
            .await
            .expect("matches exactly");
    }
}
