#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Policy registry, selector, and meaning builder (spec §4.3–§4.4).
//!
//! A [`pack::CompiledPolicyPack`] is compiled once from author-supplied
//! [`pack::Policy`] fragments and handed to services as a frozen value.
//! [`pack::select`] deterministically picks at most one policy for a given
//! business event; [`meaning::build`] turns the selection into an
//! [`meaning::AccountingIntent`] in role terms, or a terminal
//! blocked/rejected/non-posting result.

pub mod ast;
pub mod meaning;
pub mod pack;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use ast::CmpOp;
pub use ast::Expr;
pub use meaning::AccountingIntent;
pub use meaning::AmountSpec;
pub use meaning::build;
pub use meaning::DimensionSchema;
pub use meaning::InMemoryDimensionSchema;
pub use meaning::LedgerIntent;
pub use meaning::LineRoleSpec;
pub use meaning::LineSpec;
pub use meaning::MeaningResult;
pub use meaning::MeaningSpec;
pub use pack::compile;
pub use pack::select;
pub use pack::CompiledPolicyPack;
pub use pack::Guard;
pub use pack::LedgerEffect;
pub use pack::Policy;
pub use pack::Precedence;
pub use pack::SelectResult;

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy pack failed to compile: {0}")]
    Compile(String),
    #[error("guard evaluation error: {0}")]
    GuardEvaluation(String),
    #[error("meaning extraction error: {0}")]
    MeaningExtraction(String),
}

impl PolicyError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PolicyError::Compile(_) => "POLICY_AMBIGUOUS",
            PolicyError::GuardEvaluation(_) => "GUARD_EVALUATION_ERROR",
            PolicyError::MeaningExtraction(_) => "MEANING_EXTRACTION_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardAction {
    Reject,
    Block,
}
