use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use super::ConditionError;
use crate::types::RequestContext;

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)$").expect("valid variable regex")
});

/// Per-request variable table for condition compilation.
///
/// Built once per request: `$user.id`, `$user.roles`, `$tenant.id`,
/// `$path.<param>`, `$system.now` and `$system.today`.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    values: HashMap<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_request(ctx: &RequestContext, roles: &[String]) -> Self {
        let now = Utc::now();
        let mut vars = Self::new();
        vars.set("user.id", Value::String(ctx.user_id.clone()));
        vars.set("user.roles", Value::Array(roles.iter().cloned().map(Value::String).collect()));
        vars.set("tenant.id", Value::String(ctx.tenant_id.clone()));
        vars.set("system.now", Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)));
        vars.set("system.today", Value::String(now.format("%Y-%m-%d").to_string()));
        for (name, value) in &ctx.path_params {
            vars.set(format!("path.{}", name), Value::String(value.clone()));
        }
        vars
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Substitute variable references in a literal. Array elements that
    /// resolve to arrays are spliced in place.
    pub fn resolve(&self, value: &Value) -> Result<Value, ConditionError> {
        match value {
            Value::String(s) => match self.lookup(s)? {
                Some(resolved) => Ok(resolved.clone()),
                None => Ok(value.clone()),
            },
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve(item)? {
                        Value::Array(inner) if is_variable(item) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, s: &str) -> Result<Option<&Value>, ConditionError> {
        let Some(caps) = VARIABLE_RE.captures(s) else {
            return Ok(None);
        };
        let name = format!("{}.{}", &caps[1], &caps[2]);
        self.values
            .get(&name)
            .map(Some)
            .ok_or_else(|| ConditionError::UnknownVariable(s.to_string()))
    }
}

fn is_variable(value: &Value) -> bool {
    value.as_str().map(|s| VARIABLE_RE.is_match(s)).unwrap_or(false)
}
