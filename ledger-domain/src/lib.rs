#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Shared value types for the accounting kernel: money, currency, posting
//! side, artifact references, and the canonical serialization every hash
//! site in the workspace builds on.

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
    #[error("amount overflow")]
    AmountOverflow,
    #[error("negative amount not allowed: {0}")]
    NegativeAmount(i64),
}

/// A 3-letter ISO-4217 currency code, upper-cased and validated at construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let code = raw.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCurrency(raw.as_ref().to_string()));
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

/// Money represented as integer minor units (e.g. cents) of a given currency.
/// Minor-unit integers avoid floating point drift in balance checks; every
/// hash and comparison site in the kernel operates on this representation,
/// never on a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: i64,
    pub currency: CurrencyCode,
}

impl Money {
    pub fn new(minor_units: i64, currency: CurrencyCode) -> DomainResult<Self> {
        if minor_units < 0 {
            return Err(DomainError::NegativeAmount(minor_units));
        }
        Ok(Self {
            minor_units,
            currency,
        })
    }

    #[must_use]
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            });
        }
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(DomainError::AmountOverflow)?;
        Ok(Money {
            minor_units,
            currency: self.currency.clone(),
        })
    }
}

/// Which side of a double-entry line an amount posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    #[must_use]
    pub fn flip(self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Debit => write!(f, "DEBIT"),
            Side::Credit => write!(f, "CREDIT"),
        }
    }
}

/// A typed reference to an artifact elsewhere in the kernel (an event, a
/// journal entry, a subledger entry, …), used by `EconomicLink` and by
/// reconciliation candidates. Opaque outside its own artifact kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_type: String,
    pub artifact_id: String,
}

impl ArtifactRef {
    #[must_use]
    pub fn new(artifact_type: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            artifact_id: artifact_id.into(),
        }
    }
}

impl Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.artifact_type, self.artifact_id)
    }
}

/// Correlates a single request across coordinator, journal writer, audit log
/// and telemetry for a given `event_id`. Carried as a `tracing` span field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Uuid);

impl TraceId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonicalizes a JSON value for hashing: object keys sorted
/// lexicographically, recursively, with arrays left in encounter order
/// (order is semantically significant for arrays, not for objects).
/// Every `payload_hash`/`canonical_hash` site in the workspace routes
/// through this function so that hash inputs are reproducible bit-for-bit.
#[must_use]
pub fn canonicalize(value: &serde_json::Value) -> String {
    let sorted = sort_keys(value);
    sorted.to_string()
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted_map = serde_json::Map::new();
            for (k, v) in entries {
                sorted_map.insert(k.clone(), sort_keys(v));
            }
            serde_json::Value::Object(sorted_map)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn currency_code_normalizes_case() {
        let code = CurrencyCode::new(" usd ").expect("valid currency");
        assert_eq!(code.as_str(), "USD");
    }

    #[test]
    fn currency_code_rejects_bad_length() {
        assert!(CurrencyCode::new("US").is_err());
        assert!(CurrencyCode::new("USDX").is_err());
        assert!(CurrencyCode::new("U$D").is_err());
    }

    #[test]
    fn money_checked_add_requires_matching_currency() {
        let usd = CurrencyCode::new("USD").expect("valid");
        let eur = CurrencyCode::new("EUR").expect("valid");
        let a = Money::new(100, usd).expect("valid");
        let b = Money::new(50, eur).expect("valid");
        assert!(a.checked_add(&b).is_err());
    }

    #[test]
    fn money_checked_add_sums_minor_units() {
        let usd = CurrencyCode::new("USD").expect("valid");
        let a = Money::new(100, usd.clone()).expect("valid");
        let b = Money::new(50, usd).expect("valid");
        let sum = a.checked_add(&b).expect("same currency");
        assert_eq!(sum.minor_units, 150);
    }

    #[test]
    fn side_flip_round_trips() {
        assert_eq!(Side::Debit.flip(), Side::Credit);
        assert_eq!(Side::Credit.flip(), Side::Debit);
    }

    #[test]
    fn canonicalize_sorts_object_keys_recursively() {
        let value = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let canonical = canonicalize(&value);
        assert_eq!(canonical, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn canonicalize_is_stable_regardless_of_input_key_order() {
        let first = serde_json::json!({"z": 1, "a": 2});
        let second = serde_json::json!({"a": 2, "z": 1});
        assert_eq!(canonicalize(&first), canonicalize(&second));
    }
}
