use serde_json::Value;
use tracing::debug;

use super::variables::VariableContext;
use super::{Comparison, ConditionError, ConditionExpr};
use crate::filter::{Filter, FilterCompiler, Predicate};
use crate::schema::{EntityDefinition, FieldDefinition, FieldType};

/// One-way compiler from permission expressions to predicates
pub struct ConditionCompiler<'a> {
    vars: &'a VariableContext,
    entity: Option<&'a EntityDefinition>,
}

impl<'a> ConditionCompiler<'a> {
    pub fn new(vars: &'a VariableContext) -> Self {
        Self { vars, entity: None }
    }

    /// Type literals with this entity's field definitions
    pub fn with_entity(mut self, entity: &'a EntityDefinition) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn compile(&self, expr: &ConditionExpr) -> Result<Predicate, ConditionError> {
        let predicate = match expr {
            ConditionExpr::Always => Predicate::Always,
            ConditionExpr::Never => Predicate::Never,
            ConditionExpr::And(parts) => Predicate::all(self.compile_all(parts)?),
            ConditionExpr::Or(parts) => Predicate::any(self.compile_all(parts)?),
            ConditionExpr::Not(inner) => self.compile(inner)?.negate(),
            ConditionExpr::Compare(comparison) => self.compile_comparison(comparison)?,
        };
        Ok(predicate)
    }

    fn compile_all(&self, parts: &[ConditionExpr]) -> Result<Vec<Predicate>, ConditionError> {
        parts.iter().map(|p| self.compile(p)).collect()
    }

    fn compile_comparison(&self, comparison: &Comparison) -> Result<Predicate, ConditionError> {
        let value = self.vars.resolve(&comparison.value)?;
        let filter = Filter::new(comparison.field.clone(), comparison.op, value);

        let declared = self.entity.and_then(|e| e.find_field(&comparison.field));
        let predicate = match (self.entity, declared) {
            (Some(entity), Some(_)) => FilterCompiler::new(entity).compile_one(&filter)?,
            _ => {
                // System or undeclared fields: type from the field name or the literal
                let field = FieldDefinition::new(comparison.field.clone(), untyped_field_type(&comparison.field, &filter.value));
                let synthetic = EntityDefinition::new("condition").field(field);
                FilterCompiler::new(&synthetic).compile_one(&filter)?
            }
        };
        debug!(field = %comparison.field, op = comparison.op.as_str(), "Compiled condition comparison");
        Ok(predicate)
    }
}

fn untyped_field_type(field: &str, value: &Value) -> FieldType {
    match field {
        "created_at" | "updated_at" | "deleted_at" => FieldType::Date,
        "deleted" => FieldType::Boolean,
        "tenant_id" | "entity_name" | "created_by" | "updated_by" | "deleted_by" | "approval.status" => FieldType::Text,
        _ => infer_type(value),
    }
}

fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Number(_) => FieldType::Number,
        Value::Bool(_) => FieldType::Boolean,
        Value::Array(items) => items.first().map(infer_type).unwrap_or(FieldType::Text),
        _ => FieldType::Text,
    }
}
