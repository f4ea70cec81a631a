use crate::types::Value;
use crate::variables::ScopeChain;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Lte => "<=",
            CompareOp::Gte => ">=",
        }
    }
}

/// Boolean guard on a transition: `<var> <op> <value>`.
///
/// An unset variable makes the guard false whatever the operator. Ordering
/// operators only apply to numbers and strings; anything else is false.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub var: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn new(var: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            var: var.into(),
            op,
            value: value.into(),
        }
    }

    pub fn evaluate(&self, scope: &ScopeChain<'_>) -> bool {
        let Some(actual) = scope.get(&self.var) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => values_equal(actual, &self.value),
            CompareOp::Neq => !values_equal(actual, &self.value),
            CompareOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            CompareOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            CompareOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.var, self.op.symbol(), self.value)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            compare(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Integers compare exactly; only mixed Int/Float pairs go through `f64`.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}
