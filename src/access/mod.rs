// Role-based access control: permission union, filter whitelist,
// forced conditions and field masks

pub mod mask;
pub mod source;

pub use mask::{FieldAccess, FieldMask};
pub use source::{PermissionSource, StaticPermissionSource};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::condition::{ConditionCompiler, ConditionExpr, VariableContext};
use crate::error::EngineError;
use crate::filter::{Filter, Predicate};
use crate::schema::EntityDefinition;
use crate::types::{Action, RequestContext};

pub const WILDCARD_ENTITY: &str = "*";

/// What one role (or the union of several) may do for one action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPermission {
    #[serde(default)]
    pub allowed: bool,
    /// Row-level restriction; `None` means every row
    #[serde(default)]
    pub condition: Option<ConditionExpr>,
    /// Fields the caller may filter on; `None` or empty allows no filters
    #[serde(default)]
    pub ui_filters: Option<Vec<String>>,
    #[serde(default)]
    pub field_rules: HashMap<String, FieldAccess>,
}

impl ActionPermission {
    pub fn allow() -> Self {
        Self { allowed: true, ..Self::default() }
    }

    pub fn with_condition(mut self, condition: ConditionExpr) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_filters<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ui_filters = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, access: FieldAccess) -> Self {
        self.field_rules.insert(field.into(), access);
        self
    }
}

/// Per-action permissions of one role on one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPermissions {
    #[serde(default)]
    pub create: Option<ActionPermission>,
    #[serde(default)]
    pub read: Option<ActionPermission>,
    #[serde(default)]
    pub update: Option<ActionPermission>,
    #[serde(default)]
    pub delete: Option<ActionPermission>,
}

impl EntityPermissions {
    pub fn action(&self, action: Action) -> Option<&ActionPermission> {
        match action {
            Action::Create => self.create.as_ref(),
            Action::Read => self.read.as_ref(),
            Action::Update => self.update.as_ref(),
            Action::Delete => self.delete.as_ref(),
        }
    }

    pub fn set(mut self, action: Action, permission: ActionPermission) -> Self {
        let slot = match action {
            Action::Create => &mut self.create,
            Action::Read => &mut self.read,
            Action::Update => &mut self.update,
            Action::Delete => &mut self.delete,
        };
        *slot = Some(permission);
        self
    }
}

/// A role or group held by the user, with its permissions keyed by
/// entity name (`"*"` applies to entities without their own entry)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    #[serde(default)]
    pub entities: HashMap<String, EntityPermissions>,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into(), entities: HashMap::new() }
    }

    pub fn entity(mut self, entity: impl Into<String>, permissions: EntityPermissions) -> Self {
        self.entities.insert(entity.into(), permissions);
        self
    }

    /// Entity-specific entry, else the wildcard entry
    pub fn permissions_for(&self, entity: &str) -> Option<&EntityPermissions> {
        self.entities.get(entity).or_else(|| self.entities.get(WILDCARD_ENTITY))
    }
}

/// Union of action permissions across roles; `None` when no role allows
pub fn union_permissions<'p>(perms: impl IntoIterator<Item = &'p ActionPermission>) -> Option<ActionPermission> {
    let allowing: Vec<&ActionPermission> = perms.into_iter().filter(|p| p.allowed).collect();
    if allowing.is_empty() {
        return None;
    }

    let condition = if allowing.iter().any(|p| p.condition.is_none()) {
        None
    } else {
        let mut conditions: Vec<ConditionExpr> = allowing.iter().filter_map(|p| p.condition.clone()).collect();
        if conditions.len() == 1 {
            conditions.pop()
        } else {
            Some(ConditionExpr::Or(conditions))
        }
    };

    let ui_filters = if allowing.iter().all(|p| p.ui_filters.is_none()) {
        None
    } else {
        let fields: BTreeSet<String> = allowing
            .iter()
            .filter_map(|p| p.ui_filters.as_ref())
            .flatten()
            .cloned()
            .collect();
        Some(fields.into_iter().collect())
    };

    // A role without a rule for a field grants it fully
    let ruled: BTreeSet<&String> = allowing.iter().flat_map(|p| p.field_rules.keys()).collect();
    let mut field_rules = HashMap::new();
    for field in ruled {
        let best = allowing
            .iter()
            .map(|p| p.field_rules.get(field).copied().unwrap_or(FieldAccess::ReadWrite))
            .max()
            .unwrap_or(FieldAccess::ReadWrite);
        if best != FieldAccess::ReadWrite {
            field_rules.insert(field.clone(), best);
        }
    }

    Some(ActionPermission { allowed: true, condition, ui_filters, field_rules })
}

/// Grants of one user for the duration of a request
#[derive(Debug, Clone)]
pub struct UserAccess {
    grants: Vec<RoleGrant>,
}

impl UserAccess {
    pub fn new(grants: Vec<RoleGrant>) -> Self {
        Self { grants }
    }

    pub fn roles(&self) -> Vec<String> {
        self.grants.iter().map(|g| g.role.clone()).collect()
    }

    pub fn authorize(&self, entity: &str, action: Action) -> Result<ActionPermission, EngineError> {
        let perms = self
            .grants
            .iter()
            .filter_map(|g| g.permissions_for(entity))
            .filter_map(|p| p.action(action));
        match union_permissions(perms) {
            Some(permission) => Ok(permission),
            None => {
                debug!(entity, action = %action, "No role allows action");
                Err(EngineError::permission_denied(format!("{} on '{}' is not allowed", action, entity)))
            }
        }
    }

    /// Read mask for every field of the entity
    pub fn field_mask(&self, entity: &EntityDefinition) -> Result<FieldMask, EngineError> {
        let read = self.authorize(&entity.name, Action::Read)?;
        Ok(FieldMask::from_rules(entity, &read.field_rules))
    }
}

/// Access control gate in front of every record operation
#[derive(Clone)]
pub struct AccessGate {
    source: Arc<dyn PermissionSource>,
}

impl AccessGate {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self { source }
    }

    /// Load the caller's grants once per request
    pub async fn load(&self, ctx: &RequestContext) -> Result<UserAccess, EngineError> {
        let grants = self.source.roles_for(ctx).await?;
        debug!(user = %ctx.user_id, roles = grants.len(), "Loaded role grants");
        Ok(UserAccess::new(grants))
    }

    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        entity: &str,
        action: Action,
    ) -> Result<ActionPermission, EngineError> {
        self.load(ctx).await?.authorize(entity, action)
    }

    pub async fn field_mask(&self, ctx: &RequestContext, entity: &EntityDefinition) -> Result<FieldMask, EngineError> {
        self.load(ctx).await?.field_mask(entity)
    }

    /// Strict whitelist: every filter field must be listed, and an absent
    /// or empty whitelist admits no filters at all
    pub fn check_filters(permission: &ActionPermission, filters: &[Filter]) -> Result<(), EngineError> {
        let allowed: &[String] = permission.ui_filters.as_deref().unwrap_or(&[]);
        for filter in filters {
            if !allowed.iter().any(|f| f == &filter.field) {
                warn!(field = %filter.field, "Filter on non-whitelisted field rejected");
                return Err(EngineError::permission_denied(format!(
                    "Filtering on '{}' is not allowed",
                    filter.field
                )));
            }
        }
        Ok(())
    }

    /// The permission's row condition as a predicate (`Always` if none)
    pub fn forced_predicate(
        permission: &ActionPermission,
        vars: &VariableContext,
        entity: &EntityDefinition,
    ) -> Result<Predicate, EngineError> {
        match &permission.condition {
            Some(condition) => Ok(ConditionCompiler::new(vars).with_entity(entity).compile(condition)?),
            None => Ok(Predicate::Always),
        }
    }
}
