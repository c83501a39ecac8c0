use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell of a synthesized or derived table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Render the value as a CSV field. Nulls become empty fields and floats
    /// always keep a fractional part so they read back as floats.
    pub fn to_csv(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => format_float(*value),
            Value::Text(value) => value.clone(),
        }
    }

    /// Parse a CSV field back into a value, preferring integers, then floats.
    pub fn parse_csv(raw: &str) -> Value {
        if raw.is_empty() {
            return Value::Null;
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Value::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            if value.is_finite() {
                return Value::Float(value);
            }
        }
        Value::Text(raw.to_string())
    }

    /// Stable string key used for grouping and join lookups.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "<null>".to_string(),
            Value::Int(value) => format!("i:{value}"),
            Value::Float(value) => format!("f:{}", format_float(*value)),
            Value::Text(value) => format!("s:{value}"),
        }
    }

    /// Compare two values numerically when both are numeric and lexically
    /// when both are text. Nulls and mixed types do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(left), Some(right)) => left.partial_cmp(&right),
            _ => match (self, other) {
                (Value::Text(left), Value::Text(right)) => Some(left.cmp(right)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => f.write_str(&format_float(*value)),
            Value::Text(value) => write!(f, "{value:?}"),
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
