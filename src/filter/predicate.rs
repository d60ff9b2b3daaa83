use serde_json::{json, Map, Value};
use std::cmp::Ordering;

use crate::validation::TypedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn document_key(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }
}

/// Case-insensitive text match modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

/// Anything a predicate can be evaluated against
pub trait FieldSource {
    fn field_value(&self, field: &str) -> Option<TypedValue>;
}

/// Compiled, store-agnostic query constraint.
///
/// Produced by both the filter compiler and the condition compiler so that
/// user filters, forced permission conditions and the tenant guard combine
/// with plain `and`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    Never,
    Compare { field: String, op: CompareOp, value: TypedValue },
    In { field: String, values: Vec<TypedValue>, negated: bool },
    Text { field: String, mode: TextMatch, pattern: String },
    Between { field: String, low: TypedValue, high: TypedValue },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<TypedValue>) -> Self {
        Predicate::Compare { field: field.into(), op, value: value.into() }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// Conjunction, flattened and simplified
    pub fn all(parts: Vec<Predicate>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::Always => {}
                Predicate::Never => return Predicate::Never,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::Always,
            1 => out.pop().unwrap_or(Predicate::Always),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction, flattened and simplified
    pub fn any(parts: Vec<Predicate>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::Never => {}
                Predicate::Always => return Predicate::Always,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::Never,
            1 => out.pop().unwrap_or(Predicate::Never),
            _ => Predicate::Or(out),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::all(vec![self, other])
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::any(vec![self, other])
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::Always => Predicate::Never,
            Predicate::Never => Predicate::Always,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Evaluate directly against a record.
    ///
    /// Missing fields never satisfy comparisons except `eq null`, `ne` and
    /// `nin`, matching document-store semantics. List values (multiselect)
    /// satisfy `eq`/`in` when any element does.
    pub fn matches(&self, source: &dyn FieldSource) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Compare { field, op, value } => {
                let actual = source.field_value(field);
                match op {
                    CompareOp::Eq => value_eq(actual.as_ref(), value),
                    CompareOp::Ne => !value_eq(actual.as_ref(), value),
                    _ => match actual.as_ref().and_then(|a| a.compare(value)) {
                        Some(ordering) => match op {
                            CompareOp::Gt => ordering == Ordering::Greater,
                            CompareOp::Gte => ordering != Ordering::Less,
                            CompareOp::Lt => ordering == Ordering::Less,
                            CompareOp::Lte => ordering != Ordering::Greater,
                            _ => false,
                        },
                        None => false,
                    },
                }
            }
            Predicate::In { field, values, negated } => {
                let actual = source.field_value(field);
                let found = values.iter().any(|v| value_eq(actual.as_ref(), v));
                found != *negated
            }
            Predicate::Text { field, mode, pattern } => {
                let pattern = pattern.to_lowercase();
                match source.field_value(field) {
                    Some(TypedValue::List(items)) => items.iter().any(|item| text_matches(item, *mode, &pattern)),
                    Some(value) => text_matches(&value, *mode, &pattern),
                    None => false,
                }
            }
            Predicate::Between { field, low, high } => match source.field_value(field) {
                Some(actual) => {
                    matches!(actual.compare(low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(actual.compare(high), Some(Ordering::Less | Ordering::Equal))
                }
                None => false,
            },
            Predicate::And(parts) => parts.iter().all(|p| p.matches(source)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(source)),
            Predicate::Not(inner) => !inner.matches(source),
        }
    }

    /// Render as a Mongo-style where document (`{field: {$op: value}}`,
    /// `$and`/`$or`/`$not`). `Never` renders as an empty `$or`.
    pub fn to_document(&self) -> Value {
        match self {
            Predicate::Always => json!({}),
            Predicate::Never => json!({ "$or": [] }),
            Predicate::Compare { field, op, value } => {
                field_doc(field, op.document_key(), value.to_json())
            }
            Predicate::In { field, values, negated } => {
                let key = if *negated { "$nin" } else { "$in" };
                field_doc(field, key, Value::Array(values.iter().map(TypedValue::to_json).collect()))
            }
            Predicate::Text { field, mode, pattern } => {
                field_doc(field, "$ilike", Value::String(like_pattern(*mode, pattern)))
            }
            Predicate::Between { field, low, high } => {
                field_doc(field, "$between", json!([low.to_json(), high.to_json()]))
            }
            Predicate::And(parts) => {
                json!({ "$and": parts.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
            Predicate::Or(parts) => {
                json!({ "$or": parts.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
            Predicate::Not(inner) => json!({ "$not": inner.to_document() }),
        }
    }
}

fn value_eq(actual: Option<&TypedValue>, expected: &TypedValue) -> bool {
    match (actual, expected) {
        (None, TypedValue::Null) => true,
        (None, _) => false,
        (Some(TypedValue::List(items)), expected) if !matches!(expected, TypedValue::List(_)) => {
            items.iter().any(|item| item.loose_eq(expected))
        }
        (Some(actual), expected) => actual.loose_eq(expected),
    }
}

fn text_matches(value: &TypedValue, mode: TextMatch, lowered_pattern: &str) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let text = text.to_lowercase();
    match mode {
        TextMatch::Contains => text.contains(lowered_pattern),
        TextMatch::StartsWith => text.starts_with(lowered_pattern),
        TextMatch::EndsWith => text.ends_with(lowered_pattern),
    }
}

/// SQL LIKE pattern with `%`, `_` and `\` escaped
pub fn like_pattern(mode: TextMatch, pattern: &str) -> String {
    let escaped = pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    match mode {
        TextMatch::Contains => format!("%{}%", escaped),
        TextMatch::StartsWith => format!("{}%", escaped),
        TextMatch::EndsWith => format!("%{}", escaped),
    }
}

fn field_doc(field: &str, key: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(key.to_string(), value);
    let mut outer = Map::new();
    outer.insert(field.to_string(), Value::Object(inner));
    Value::Object(outer)
}
