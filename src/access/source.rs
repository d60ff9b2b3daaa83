use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use super::RoleGrant;
use crate::error::EngineError;
use crate::types::RequestContext;

/// Where the caller's roles and groups come from
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn roles_for(&self, ctx: &RequestContext) -> Result<Vec<RoleGrant>, EngineError>;
}

/// Fixed role table keyed by `tenant_id/user_id`
#[derive(Debug, Default)]
pub struct StaticPermissionSource {
    roles: RwLock<HashMap<String, RoleGrant>>,
    assignments: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load role definitions from YAML: a list of `{role, entities}` items
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let raw: Value = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::internal(format!("Invalid role definitions: {}", e)))?;
        let grants: Vec<RoleGrant> = serde_json::from_value(raw)
            .map_err(|e| EngineError::internal(format!("Invalid role definitions: {}", e)))?;
        let source = Self::new();
        for grant in grants {
            source.define_role(grant);
        }
        Ok(source)
    }

    pub fn define_role(&self, grant: RoleGrant) {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        roles.insert(grant.role.clone(), grant);
    }

    pub fn assign(&self, tenant_id: &str, user_id: &str, role: impl Into<String>) {
        let mut assignments = self.assignments.write().unwrap_or_else(|e| e.into_inner());
        assignments.entry(key(tenant_id, user_id)).or_default().push(role.into());
    }
}

fn key(tenant_id: &str, user_id: &str) -> String {
    format!("{}/{}", tenant_id, user_id)
}

#[async_trait]
impl PermissionSource for StaticPermissionSource {
    async fn roles_for(&self, ctx: &RequestContext) -> Result<Vec<RoleGrant>, EngineError> {
        let assignments = self.assignments.read().unwrap_or_else(|e| e.into_inner());
        let roles = self.roles.read().unwrap_or_else(|e| e.into_inner());
        Ok(assignments
            .get(&key(&ctx.tenant_id, &ctx.user_id))
            .map(|names| names.iter().filter_map(|name| roles.get(name).cloned()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    #[tokio::test]
    async fn test_yaml_roles_and_assignment() {
        let source = StaticPermissionSource::from_yaml_str(
            r#"
- role: sales
  entities:
    deals:
      read:
        allowed: true
        ui_filters: [stage]
        condition:
          compare: {field: owner, value: $user.id}
        field_rules:
          margin: none
"#,
        )
        .unwrap();
        source.assign("t1", "u1", "sales");

        let grants = source.roles_for(&RequestContext::new("t1", "u1")).await.unwrap();
        assert_eq!(grants.len(), 1);
        let read = grants[0].permissions_for("deals").unwrap().action(Action::Read).unwrap();
        assert!(read.allowed && read.condition.is_some());

        let nobody = source.roles_for(&RequestContext::new("t2", "u1")).await.unwrap();
        assert!(nobody.is_empty());
    }
}
