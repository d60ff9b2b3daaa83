// Predicate -> parameterised Postgres SQL over the entity_records table
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use super::predicate::{like_pattern, CompareOp, Predicate};
use super::types::SortSpec;
use crate::schema::{EntityDefinition, FieldType};
use crate::validation::TypedValue;

/// Bind value for a rendered query, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Uuid(Uuid),
    Number(f64),
    Integer(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Decimal(Decimal),
    Json(Value),
    TextList(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}

const TEXT_COLUMNS: &[&str] = &["tenant_id", "entity_name", "created_by", "updated_by", "deleted_by"];
const TIME_COLUMNS: &[&str] = &["created_at", "updated_at", "deleted_at"];

/// Accumulates `$n` parameters while rendering predicates
pub struct SqlWhere {
    params: Vec<SqlParam>,
}

impl SqlWhere {
    /// Start numbering after `existing` already-bound parameters
    pub fn new(existing: Vec<SqlParam>) -> Self {
        Self { params: existing }
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }

    pub fn render(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Always => "1=1".to_string(),
            Predicate::Never => "1=0".to_string(),
            Predicate::Compare { field, op, value } => match op {
                CompareOp::Eq => self.render_eq(field, value),
                CompareOp::Ne => format!("NOT COALESCE({}, false)", self.render_eq(field, value)),
                _ => {
                    let column = column_expr(field, value);
                    let placeholder = self.bind(value);
                    format!("{} {} {}", column, range_sql(*op), placeholder)
                }
            },
            Predicate::In { values, negated, .. } if values.is_empty() => {
                if *negated { "1=1" } else { "1=0" }.to_string()
            }
            Predicate::In { field, values, negated } => {
                let parts: Vec<String> = values.iter().map(|v| self.render_eq(field, v)).collect();
                let any = format!("({})", parts.join(" OR "));
                if *negated {
                    format!("NOT COALESCE({}, false)", any)
                } else {
                    any
                }
            }
            Predicate::Text { field, mode, pattern } => {
                let placeholder = self.param(SqlParam::Text(like_pattern(*mode, pattern)));
                match system_column(field) {
                    Some(column) => format!("{}::text ILIKE {}", column, placeholder),
                    None => {
                        let doc = data_json(field);
                        format!(
                            "EXISTS (SELECT 1 FROM jsonb_array_elements_text(CASE jsonb_typeof({doc}) \
                             WHEN 'array' THEN {doc} WHEN 'string' THEN jsonb_build_array({doc}) \
                             ELSE '[]'::jsonb END) AS t(v) WHERE t.v ILIKE {placeholder})"
                        )
                    }
                }
            }
            Predicate::Between { field, low, high } => {
                let column = column_expr(field, low);
                let low = self.bind(low);
                let high = self.bind(high);
                format!("{} BETWEEN {} AND {}", column, low, high)
            }
            Predicate::And(parts) => self.join(parts, " AND "),
            Predicate::Or(parts) => self.join(parts, " OR "),
            Predicate::Not(inner) => format!("NOT COALESCE(({}), false)", self.render(inner)),
        }
    }

    fn join(&mut self, parts: &[Predicate], joiner: &str) -> String {
        let rendered: Vec<String> = parts.iter().map(|p| format!("({})", self.render(p))).collect();
        rendered.join(joiner)
    }

    fn render_eq(&mut self, field: &str, value: &TypedValue) -> String {
        if value.is_null() {
            return match system_column(field) {
                Some(column) => format!("{} IS NULL", column),
                None => format!("({doc} IS NULL OR {doc} = 'null'::jsonb)", doc = data_json(field)),
            };
        }

        if system_column(field).is_none() {
            match value {
                // Matches scalar strings and string elements of arrays
                TypedValue::Text(s) | TypedValue::Ref(s) => {
                    let placeholder = self.param(SqlParam::Text(s.clone()));
                    return format!("{} @> to_jsonb({}::text)", data_json(field), placeholder);
                }
                TypedValue::List(_) | TypedValue::Json(_) => {
                    let placeholder = self.param(SqlParam::Json(value.to_json()));
                    return format!("{} = {}", data_json(field), placeholder);
                }
                _ => {}
            }
        }

        let column = column_expr(field, value);
        let placeholder = self.bind(value);
        format!("{} = {}", column, placeholder)
    }

    fn bind(&mut self, value: &TypedValue) -> String {
        let param = match value {
            TypedValue::Null => SqlParam::Json(Value::Null),
            TypedValue::Text(s) => SqlParam::Text(s.clone()),
            TypedValue::Ref(s) => match Uuid::parse_str(s) {
                Ok(id) => SqlParam::Uuid(id),
                Err(_) => SqlParam::Text(s.clone()),
            },
            TypedValue::Number(n) => SqlParam::Number(*n),
            TypedValue::Bool(b) => SqlParam::Bool(*b),
            TypedValue::Date(dt) => SqlParam::Timestamp(*dt),
            TypedValue::Currency(d) => SqlParam::Decimal(*d),
            TypedValue::List(_) | TypedValue::Json(_) => SqlParam::Json(value.to_json()),
        };
        self.param(param)
    }

    pub fn param(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

/// Render a complete WHERE body with fresh parameter numbering
pub fn render_where(predicate: &Predicate) -> SqlResult {
    let mut builder = SqlWhere::new(Vec::new());
    let query = builder.render(predicate);
    SqlResult { query, params: builder.into_params() }
}

/// `ORDER BY` clause; data fields are cast by their declared type
pub fn render_order(entity: &EntityDefinition, sort: &[SortSpec]) -> String {
    if sort.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = sort
        .iter()
        .map(|spec| {
            let column = match system_column(&spec.field) {
                Some(column) => column,
                None => match entity.find_field(&spec.field).map(|f| &f.field_type) {
                    Some(FieldType::Number) => format!("({})::float8", data_text(&spec.field)),
                    Some(FieldType::Currency) => format!("({})::numeric", data_text(&spec.field)),
                    Some(FieldType::Date) => format!("({})::timestamptz", data_text(&spec.field)),
                    _ => data_text(&spec.field),
                },
            };
            format!("{} {}", column, spec.direction.to_sql())
        })
        .collect();
    format!("ORDER BY {}", parts.join(", "))
}

fn system_column(field: &str) -> Option<String> {
    match field {
        "id" => Some("\"id\"".to_string()),
        "deleted" => Some("\"deleted\"".to_string()),
        "approval.status" => Some("(approval->>'status')".to_string()),
        f if TEXT_COLUMNS.contains(&f) || TIME_COLUMNS.contains(&f) => Some(format!("\"{}\"", f)),
        _ => None,
    }
}

fn column_expr(field: &str, value: &TypedValue) -> String {
    if let Some(column) = system_column(field) {
        let typed = match value {
            TypedValue::Date(_) => TIME_COLUMNS.contains(&field),
            TypedValue::Bool(_) => field == "deleted",
            TypedValue::Ref(s) => field == "id" && Uuid::parse_str(s).is_ok(),
            TypedValue::Text(_) => TEXT_COLUMNS.contains(&field) || field == "approval.status",
            _ => false,
        };
        return if typed { column } else { format!("{}::text", column) };
    }

    let text = data_text(field);
    match value {
        TypedValue::Number(_) => format!("({})::float8", text),
        TypedValue::Currency(_) => format!("({})::numeric", text),
        TypedValue::Date(_) => format!("({})::timestamptz", text),
        TypedValue::Bool(_) => format!("({})::boolean", text),
        TypedValue::List(_) | TypedValue::Json(_) => data_json(field),
        _ => text,
    }
}

fn quote_key(field: &str) -> String {
    field.replace('\'', "''")
}

fn data_json(field: &str) -> String {
    format!("data->'{}'", quote_key(field))
}

fn data_text(field: &str) -> String {
    format!("data->>'{}'", quote_key(field))
}

fn range_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
    }
}
