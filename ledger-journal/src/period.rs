//! Fiscal period lifecycle (spec §4.6): `OPEN -> CLOSING -> CLOSED -> LOCKED`,
//! gating postings by effective date.

use std::collections::HashMap;

use chrono::Datelike;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

pub type PeriodResult<T> = Result<T, PeriodError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("period not found: {0}")]
    NotFound(String),
    #[error("period is closed: {0}")]
    PeriodClosed(String),
    #[error("period is closing: {0}")]
    PeriodClosing(String),
    #[error("adjustments are not allowed for period: {0}")]
    AdjustmentsNotAllowed(String),
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: PeriodState, to: PeriodState },
}

impl PeriodError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PeriodError::NotFound(_) => "PERIOD_NOT_FOUND",
            PeriodError::PeriodClosed(_) => "PERIOD_CLOSED",
            PeriodError::PeriodClosing(_) => "PERIOD_CLOSING",
            PeriodError::AdjustmentsNotAllowed(_) => "ADJUSTMENTS_NOT_ALLOWED",
            PeriodError::InvalidTransition { .. } => "PERIOD_INVALID_TRANSITION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodState {
    Open,
    Closing,
    Closed,
    Locked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub period_code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodState,
    pub allows_adjustments: bool,
    pub closing_run_id: Option<String>,
}

impl FiscalPeriod {
    #[must_use]
    pub fn new(period_code: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            period_code: period_code.into(),
            start_date,
            end_date,
            status: PeriodState::Open,
            allows_adjustments: true,
            closing_run_id: None,
        }
    }

    fn ensure_posting_allowed(&self, is_close_posting: bool) -> PeriodResult<()> {
        match self.status {
            PeriodState::Open => Ok(()),
            PeriodState::Closing if is_close_posting => Ok(()),
            PeriodState::Closing => Err(PeriodError::PeriodClosing(self.period_code.clone())),
            // R12: once a period is CLOSED or LOCKED, every posting fails with
            // PERIOD_CLOSED, with no `allows_adjustments` exception — that flag
            // only governs adjustment postings while the period is still OPEN
            // or CLOSING (R13), not after it has actually closed.
            PeriodState::Closed | PeriodState::Locked => {
                Err(PeriodError::PeriodClosed(self.period_code.clone()))
            }
        }
    }
}

fn period_code_for(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year_ce().1, date.month())
}

/// Operations required by the journal writer and the close orchestrator
/// that sits above this kernel (spec §4.6).
#[async_trait::async_trait]
pub trait PeriodService: Send + Sync {
    async fn validate_effective_date(
        &self,
        date: NaiveDate,
        is_close_posting: bool,
    ) -> PeriodResult<()>;

    async fn open(&self, period_code: &str, start_date: NaiveDate, end_date: NaiveDate) -> PeriodResult<FiscalPeriod>;

    async fn begin_close(&self, period_code: &str, run_id: &str) -> PeriodResult<FiscalPeriod>;

    async fn cancel_close(&self, period_code: &str) -> PeriodResult<FiscalPeriod>;

    async fn close(&self, period_code: &str) -> PeriodResult<FiscalPeriod>;

    async fn lock(&self, period_code: &str) -> PeriodResult<FiscalPeriod>;

    async fn get(&self, period_code: &str) -> PeriodResult<FiscalPeriod>;
}

#[derive(Default)]
pub struct InMemoryPeriodService {
    periods: RwLock<HashMap<String, FiscalPeriod>>,
}

impl InMemoryPeriodService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        periods: &mut HashMap<String, FiscalPeriod>,
        period_code: &str,
        expected_from: &[PeriodState],
        to: PeriodState,
        set_run_id: Option<Option<String>>,
    ) -> PeriodResult<FiscalPeriod> {
        let period = periods
            .get_mut(period_code)
            .ok_or_else(|| PeriodError::NotFound(period_code.to_string()))?;
        if !expected_from.contains(&period.status) {
            return Err(PeriodError::InvalidTransition {
                from: period.status,
                to,
            });
        }
        period.status = to;
        if let Some(run_id) = set_run_id {
            period.closing_run_id = run_id;
        }
        Ok(period.clone())
    }
}

#[async_trait::async_trait]
impl PeriodService for InMemoryPeriodService {
    async fn validate_effective_date(
        &self,
        date: NaiveDate,
        is_close_posting: bool,
    ) -> PeriodResult<()> {
        let guard = self.periods.read().await;
        let code = period_code_for(date);
        let period = guard
            .get(&code)
            .ok_or_else(|| PeriodError::NotFound(code.clone()))?;
        period.ensure_posting_allowed(is_close_posting)
    }

    async fn open(&self, period_code: &str, start_date: NaiveDate, end_date: NaiveDate) -> PeriodResult<FiscalPeriod> {
        let mut guard = self.periods.write().await;
        let period = FiscalPeriod::new(period_code, start_date, end_date);
        guard.insert(period_code.to_string(), period.clone());
        Ok(period)
    }

    async fn begin_close(&self, period_code: &str, run_id: &str) -> PeriodResult<FiscalPeriod> {
        let mut guard = self.periods.write().await;
        Self::transition(
            &mut guard,
            period_code,
            &[PeriodState::Open],
            PeriodState::Closing,
            Some(Some(run_id.to_string())),
        )
    }

    async fn cancel_close(&self, period_code: &str) -> PeriodResult<FiscalPeriod> {
        let mut guard = self.periods.write().await;
        Self::transition(
            &mut guard,
            period_code,
            &[PeriodState::Closing],
            PeriodState::Open,
            Some(None),
        )
    }

    async fn close(&self, period_code: &str) -> PeriodResult<FiscalPeriod> {
        let mut guard = self.periods.write().await;
        Self::transition(
            &mut guard,
            period_code,
            &[PeriodState::Closing],
            PeriodState::Closed,
            None,
        )
    }

    async fn lock(&self, period_code: &str) -> PeriodResult<FiscalPeriod> {
        let mut guard = self.periods.write().await;
        Self::transition(
            &mut guard,
            period_code,
            &[PeriodState::Closed],
            PeriodState::Locked,
            None,
        )
    }

    async fn get(&self, period_code: &str) -> PeriodResult<FiscalPeriod> {
        let guard = self.periods.read().await;
        guard
            .get(period_code)
            .cloned()
            .ok_or_else(|| PeriodError::NotFound(period_code.to_string()))
    }
}
