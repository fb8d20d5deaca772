//! Restricted guard expression AST (spec §6): comparisons, logical ops,
//! field access on `payload.*`, `in`/`not_in`, `abs`, `len`, literals.
//! Closed by construction — there is no parser from free text, so nothing
//! outside this enum's variants can ever be expressed, satisfying "anything
//! else fails compilation" without needing a separate compiler pass.

use serde::Deserialize;
use serde::Serialize;

use crate::PolicyError;
use crate::PolicyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: serde_json::Value },
    /// Dot-separated path rooted at the event payload, e.g. `"vendor.id"`
    /// reads `payload["vendor"]["id"]`.
    Field { path: String },
    Cmp {
        cmp: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And { terms: Vec<Expr> },
    Or { terms: Vec<Expr> },
    Not { term: Box<Expr> },
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
    NotIn {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
    Abs { term: Box<Expr> },
    Len { term: Box<Expr> },
}

impl Expr {
    #[must_use]
    pub fn literal(value: serde_json::Value) -> Self {
        Expr::Literal { value }
    }

    #[must_use]
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field { path: path.into() }
    }

    #[must_use]
    pub fn cmp(cmp: CmpOp, left: Expr, right: Expr) -> Self {
        Expr::Cmp {
            cmp,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

static NULL: serde_json::Value = serde_json::Value::Null;

fn field_value<'a>(payload: &'a serde_json::Value, path: &str) -> &'a serde_json::Value {
    let mut current = payload;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &NULL,
        }
    }
    current
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    }
}

fn as_f64(value: &serde_json::Value) -> PolicyResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| PolicyError::GuardEvaluation(format!("expected a number, got {value}")))
}

fn compare(cmp: CmpOp, left: &serde_json::Value, right: &serde_json::Value) -> PolicyResult<bool> {
    use serde_json::Value;
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (l, r) = (as_f64(left)?, as_f64(right)?);
            Ok(match cmp {
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
                CmpOp::Eq => (l - r).abs() < f64::EPSILON,
                CmpOp::Ne => (l - r).abs() >= f64::EPSILON,
            })
        }
        (Value::String(l), Value::String(r)) => Ok(match cmp {
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
        }),
        (Value::Bool(l), Value::Bool(r)) => match cmp {
            CmpOp::Eq => Ok(l == r),
            CmpOp::Ne => Ok(l != r),
            _ => Err(PolicyError::GuardEvaluation(
                "ordering comparisons require numbers or strings".into(),
            )),
        },
        (Value::Null, Value::Null) => match cmp {
            CmpOp::Eq => Ok(true),
            CmpOp::Ne => Ok(false),
            _ => Err(PolicyError::GuardEvaluation(
                "ordering comparisons require numbers or strings".into(),
            )),
        },
        _ => match cmp {
            CmpOp::Eq => Ok(false),
            CmpOp::Ne => Ok(true),
            _ => Err(PolicyError::GuardEvaluation(format!(
                "cannot compare {left} and {right}"
            ))),
        },
    }
}

/// Evaluates a guard expression against an event payload. The root of every
/// `Field` path is the payload itself, matching spec §6's `payload.*`
/// restriction.
pub fn eval(expr: &Expr, payload: &serde_json::Value) -> PolicyResult<serde_json::Value> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),
        Expr::Field { path } => Ok(field_value(payload, path).clone()),
        Expr::Cmp { cmp, left, right } => {
            let l = eval(left, payload)?;
            let r = eval(right, payload)?;
            Ok(serde_json::Value::Bool(compare(*cmp, &l, &r)?))
        }
        Expr::And { terms } => {
            for term in terms {
                if !truthy(&eval(term, payload)?) {
                    return Ok(serde_json::Value::Bool(false));
                }
            }
            Ok(serde_json::Value::Bool(true))
        }
        Expr::Or { terms } => {
            for term in terms {
                if truthy(&eval(term, payload)?) {
                    return Ok(serde_json::Value::Bool(true));
                }
            }
            Ok(serde_json::Value::Bool(false))
        }
        Expr::Not { term } => Ok(serde_json::Value::Bool(!truthy(&eval(term, payload)?))),
        Expr::In { needle, haystack } => {
            let needle_value = eval(needle, payload)?;
            let haystack_value = eval(haystack, payload)?;
            let items = haystack_value.as_array().ok_or_else(|| {
                PolicyError::GuardEvaluation("`in` requires an array haystack".into())
            })?;
            Ok(serde_json::Value::Bool(items.contains(&needle_value)))
        }
        Expr::NotIn { needle, haystack } => {
            let needle_value = eval(needle, payload)?;
            let haystack_value = eval(haystack, payload)?;
            let items = haystack_value.as_array().ok_or_else(|| {
                PolicyError::GuardEvaluation("`not_in` requires an array haystack".into())
            })?;
            Ok(serde_json::Value::Bool(!items.contains(&needle_value)))
        }
        Expr::Abs { term } => {
            let value = eval(term, payload)?;
            Ok(serde_json::Value::from(as_f64(&value)?.abs()))
        }
        Expr::Len { term } => {
            let value = eval(term, payload)?;
            let len = match &value {
                serde_json::Value::Array(items) => items.len(),
                serde_json::Value::String(s) => s.chars().count(),
                other => {
                    return Err(PolicyError::GuardEvaluation(format!(
                        "`len` requires an array or string, got {other}"
                    )));
                }
            };
            Ok(serde_json::Value::from(len))
        }
    }
}

/// Evaluates an expression for truthiness directly — used by guard
/// conditions and where-clauses, both of which need a boolean, not the
/// possibly-non-boolean value `eval` returns for e.g. `Field`.
pub fn eval_bool(expr: &Expr, payload: &serde_json::Value) -> PolicyResult<bool> {
    Ok(truthy(&eval(expr, payload)?))
}
