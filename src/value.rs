use crate::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Runtime value ( Null, Int, Float, Str, Bool ).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// Kind name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Str(_) => "STRING",
            Value::Bool(_) => "BOOLEAN",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn num(&self) -> Option<f64> {
        match self {
            Value::Int(x) => Some(*x as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Get integer value.
    pub fn int(&self) -> Result<i64> {
        match self {
            Value::Int(x) => Ok(*x),
            _ => Err(ExecError::TypeMismatch(format!("expected INTEGER, got {}", self.kind_name())).into()),
        }
    }

    /// Get float value, widening from integer.
    pub fn float(&self) -> Result<f64> {
        match self {
            Value::Int(x) => Ok(*x as f64),
            Value::Float(x) => Ok(*x),
            _ => Err(ExecError::TypeMismatch(format!("expected FLOAT, got {}", self.kind_name())).into()),
        }
    }

    /// Total ordering over values. Null sorts first, then Bool, then
    /// numbers ( Int and Float compare numerically ), then strings.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Str(_) => 3,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Ordering used by ORDER BY, where nulls sort as if zero.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        static ZERO: Value = Value::Int(0);
        let a = if self.is_null() { &ZERO } else { self };
        let b = if other.is_null() { &ZERO } else { other };
        a.total_cmp(b)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Quoted rendering used when a value appears inside an IR listing.
pub fn quoted(v: &Value) -> String {
    match v {
        Value::Str(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_kind_numeric_order() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.0)), Ordering::Equal);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).total_cmp(&Value::Int(2)), Ordering::Greater);
    }

    #[test]
    fn null_sorts_first_but_orders_as_zero() {
        assert_eq!(Value::Null.total_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(-5)), Ordering::Greater);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(5)), Ordering::Less);
    }

    #[test]
    fn string_order() {
        assert!(Value::Str("a".into()) < Value::Str("b".into()));
        assert!(Value::Int(100) < Value::Str("0".into()));
    }
}
