use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::error::FilterError;
use super::predicate::{CompareOp, Predicate, TextMatch};
use super::types::{Filter, FilterOp};
use crate::schema::{EntityDefinition, FieldDefinition, FieldType};
use crate::validation::{convert_value, parse_date, parse_number, split_values, TypedValue};

/// Compiles user filter requests against one entity's field definitions
pub struct FilterCompiler<'a> {
    entity: &'a EntityDefinition,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(entity: &'a EntityDefinition) -> Self {
        Self { entity }
    }

    /// Compile an ordered filter list into one conjunction.
    ///
    /// Stops at the first invalid value; the error names the field label.
    pub fn compile(&self, filters: &[Filter]) -> Result<Predicate, FilterError> {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            parts.push(self.compile_one(filter)?);
        }
        let predicate = Predicate::all(parts);

        if crate::config::CONFIG.filter.debug_logging {
            debug!(entity = %self.entity.name, where_doc = %predicate.to_document(), "Compiled filters");
        }
        Ok(predicate)
    }

    pub fn compile_one(&self, filter: &Filter) -> Result<Predicate, FilterError> {
        if filter.field == "id" || filter.field == "_id" {
            return compile_id(filter);
        }

        let Some(field) = self.entity.find_field(&filter.field) else {
            // Undeclared names (system fields such as created_by) compare verbatim
            return Ok(Predicate::eq(filter.field.clone(), TypedValue::from_json(&filter.value)));
        };

        match filter.operator {
            FilterOp::Eq | FilterOp::Ne => {
                let value = convert_or_null(field, &filter.value)?;
                let op = if filter.operator == FilterOp::Eq { CompareOp::Eq } else { CompareOp::Ne };
                Ok(Predicate::compare(field.name.clone(), op, value))
            }
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let value = convert_value(field, &filter.value)
                    .map_err(|source| invalid_value(field, source))?
                    .ok_or_else(|| FilterError::MissingValue { label: label(field) })?;
                let op = match filter.operator {
                    FilterOp::Gt => CompareOp::Gt,
                    FilterOp::Gte => CompareOp::Gte,
                    FilterOp::Lt => CompareOp::Lt,
                    _ => CompareOp::Lte,
                };
                Ok(Predicate::compare(field.name.clone(), op, value))
            }
            FilterOp::In | FilterOp::Nin => {
                let element = element_field(field);
                let mut values = Vec::new();
                for raw in split_values(&filter.value) {
                    if let Some(value) = convert_value(&element, &raw).map_err(|source| invalid_value(field, source))? {
                        values.push(value);
                    }
                }
                Ok(Predicate::In {
                    field: field.name.clone(),
                    values,
                    negated: filter.operator == FilterOp::Nin,
                })
            }
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                let mode = match filter.operator {
                    FilterOp::Contains => TextMatch::Contains,
                    FilterOp::StartsWith => TextMatch::StartsWith,
                    _ => TextMatch::EndsWith,
                };
                self.compile_text(field, mode, &filter.value)
            }
            FilterOp::Between => compile_between(field, &filter.value),
        }
    }

    fn compile_text(&self, field: &FieldDefinition, mode: TextMatch, raw: &Value) -> Result<Predicate, FilterError> {
        if field.field_type.is_text_like() || field.field_type == FieldType::Multiselect {
            let pattern = match raw {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => return Err(FilterError::MissingValue { label: label(field) }),
                _ => {
                    return Err(invalid_value(
                        field,
                        crate::validation::ValidationError::invalid_type(field, "text value"),
                    ))
                }
            };
            return Ok(Predicate::Text { field: field.name.clone(), mode, pattern });
        }

        // No substring semantics for typed values
        let value = convert_or_null(field, raw)?;
        Ok(Predicate::eq(field.name.clone(), value))
    }
}

fn compile_id(filter: &Filter) -> Result<Predicate, FilterError> {
    match filter.operator {
        FilterOp::Eq | FilterOp::Ne => {
            let parsed = filter.value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok());
            match (parsed, filter.operator) {
                (Some(id), FilterOp::Eq) => Ok(Predicate::eq("id", TypedValue::Ref(id.to_string()))),
                (Some(id), _) => Ok(Predicate::ne("id", TypedValue::Ref(id.to_string()))),
                (None, FilterOp::Eq) => {
                    debug!(value = %filter.value, "Unparsable id in eq filter; matching nothing");
                    Ok(Predicate::In { field: "id".to_string(), values: Vec::new(), negated: false })
                }
                (None, _) => {
                    debug!(value = %filter.value, "Unparsable id in ne filter; ignoring");
                    Ok(Predicate::Always)
                }
            }
        }
        FilterOp::In | FilterOp::Nin => {
            let mut values = Vec::new();
            for raw in split_values(&filter.value) {
                match raw.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok()) {
                    Some(id) => values.push(TypedValue::Ref(id.to_string())),
                    None => debug!(value = %raw, "Skipping unparsable id in filter"),
                }
            }
            Ok(Predicate::In {
                field: "id".to_string(),
                values,
                negated: filter.operator == FilterOp::Nin,
            })
        }
        other => Err(FilterError::UnsupportedOperator {
            field: filter.field.clone(),
            operator: other.as_str().to_string(),
        }),
    }
}

fn compile_between(field: &FieldDefinition, raw: &Value) -> Result<Predicate, FilterError> {
    let parts: Vec<Value> = match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) => s.split(',').map(|p| Value::String(p.trim().to_string())).collect(),
        Value::Null => return Err(FilterError::MissingValue { label: label(field) }),
        _ => Vec::new(),
    };
    if parts.len() != 2 {
        return Err(FilterError::InvalidRange { label: label(field) });
    }

    let as_date = |v: &Value| v.as_str().and_then(parse_date);
    if let (Some(low), Some(high)) = (as_date(&parts[0]), as_date(&parts[1])) {
        return Ok(Predicate::Between {
            field: field.name.clone(),
            low: TypedValue::Date(low),
            high: TypedValue::Date(high),
        });
    }
    if let (Some(low), Some(high)) = (parse_number(&parts[0]), parse_number(&parts[1])) {
        return Ok(Predicate::Between {
            field: field.name.clone(),
            low: TypedValue::Number(low),
            high: TypedValue::Number(high),
        });
    }
    Err(FilterError::InvalidRange { label: label(field) })
}

fn convert_or_null(field: &FieldDefinition, raw: &Value) -> Result<TypedValue, FilterError> {
    let element = element_field(field);
    Ok(convert_value(&element, raw)
        .map_err(|source| invalid_value(field, source))?
        .unwrap_or(TypedValue::Null))
}

/// Multiselect values are matched one option at a time
fn element_field(field: &FieldDefinition) -> FieldDefinition {
    if field.field_type == FieldType::Multiselect {
        let mut element = field.clone();
        element.field_type = FieldType::Select;
        element
    } else {
        field.clone()
    }
}

fn label(field: &FieldDefinition) -> String {
    field.display_label().to_string()
}

fn invalid_value(field: &FieldDefinition, source: crate::validation::ValidationError) -> FilterError {
    FilterError::InvalidValue { label: label(field), source }
}
