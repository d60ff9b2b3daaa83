use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// A field value after conversion against its field definition.
///
/// Records only ever store these; raw JSON is converted at the boundary
/// (`convert_value`) and rendered back with `to_json`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Currency(Decimal),
    List(Vec<TypedValue>),
    /// Identifier of a lookup target or stored file
    Ref(String),
    /// Values of field types this engine does not interpret
    Json(Value),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// String content of text-ish values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) | TypedValue::Ref(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Null => Value::Null,
            TypedValue::Text(s) | TypedValue::Ref(s) => Value::String(s.clone()),
            TypedValue::Number(n) => number_to_json(*n),
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::Date(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            TypedValue::Currency(d) => Value::String(d.normalize().to_string()),
            TypedValue::List(items) => Value::Array(items.iter().map(TypedValue::to_json).collect()),
            TypedValue::Json(v) => v.clone(),
        }
    }

    /// Schema-less mapping used where no field definition applies
    /// (system fields, fields unknown to the entity)
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => TypedValue::Null,
            Value::Bool(b) => TypedValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(TypedValue::Number).unwrap_or(TypedValue::Null),
            Value::String(s) => TypedValue::Text(s.clone()),
            Value::Array(items) => TypedValue::List(items.iter().map(TypedValue::from_json).collect()),
            Value::Object(_) => TypedValue::Json(value.clone()),
        }
    }

    /// Ordering between comparable values; `None` when the kinds differ
    pub fn compare(&self, other: &TypedValue) -> Option<Ordering> {
        match (self, other) {
            (TypedValue::Number(a), TypedValue::Number(b)) => a.partial_cmp(b),
            (TypedValue::Currency(a), TypedValue::Currency(b)) => Some(a.cmp(b)),
            (TypedValue::Currency(a), TypedValue::Number(b)) => Decimal::from_f64(*b).map(|b| a.cmp(&b)),
            (TypedValue::Number(a), TypedValue::Currency(b)) => Decimal::from_f64(*a).map(|a| a.cmp(b)),
            (TypedValue::Date(a), TypedValue::Date(b)) => Some(a.cmp(b)),
            (TypedValue::Bool(a), TypedValue::Bool(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }

    /// Equality that treats text and reference ids alike and compares
    /// numbers against currency amounts
    pub fn loose_eq(&self, other: &TypedValue) -> bool {
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => true,
            (TypedValue::List(a), TypedValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (TypedValue::Json(a), TypedValue::Json(b)) => a == b,
            (a, b) => a.compare(b) == Some(Ordering::Equal),
        }
    }
}

fn number_to_json(n: f64) -> Value {
    // Keep integral values as JSON integers so `18` round-trips as `18`
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Text(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::Text(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        TypedValue::Number(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(value: DateTime<Utc>) -> Self {
        TypedValue::Date(value)
    }
}
