// Declarative permission conditions compiled to predicates

pub mod compiler;
pub mod variables;

pub use compiler::ConditionCompiler;
pub use variables::VariableContext;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::filter::{FilterError, FilterOp};

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Unknown condition variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid condition expression: {0}")]
    InvalidExpression(String),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Permission rule expression, written in YAML or JSON as
/// `{"and": [...]}`, `{"or": [...]}`, `{"not": ...}`,
/// `{"compare": {"field", "op", "value"}}`, `"always"` or `"never"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionExpr {
    Always,
    Never,
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Compare(Comparison),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: String,
    #[serde(default)]
    pub op: FilterOp,
    /// Literal or `$namespace.name` variable reference
    #[serde(default)]
    pub value: Value,
}

impl ConditionExpr {
    pub fn parse(value: &Value) -> Result<Self, ConditionError> {
        serde_json::from_value(value.clone()).map_err(|e| ConditionError::InvalidExpression(e.to_string()))
    }

    pub fn compare(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        ConditionExpr::Compare(Comparison { field: field.into(), op, value: value.into() })
    }
}
