pub mod diff;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::filter::{FieldSource, Predicate};
use crate::validation::TypedValue;

pub use diff::{diff_created, diff_records, ChangeType, FieldChange};

/// Fields owned by the engine; never accepted from a payload
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "tenant_id",
    "entity_name",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
    "deleted",
    "deleted_at",
    "deleted_by",
    "approval",
];

pub fn is_system_field(name: &str) -> bool {
    name == "_id" || SYSTEM_FIELDS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step: u32,
    pub action: String,
    pub actor: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

/// Workflow position of a record; `Pending` locks it against writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalState {
    pub status: ApprovalStatus,
    pub current_step: u32,
    pub workflow_id: String,
    #[serde(default)]
    pub history: Vec<ApprovalStep>,
}

impl ApprovalState {
    pub fn pending(workflow_id: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            current_step: 1,
            workflow_id: workflow_id.into(),
            history: Vec::new(),
        }
    }
}

/// A stored record of a runtime-defined entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub entity_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub data: BTreeMap<String, TypedValue>,
    pub approval: Option<ApprovalState>,
}

impl EntityRecord {
    /// Fresh record stamped for `actor` at `at`
    pub fn new(
        tenant_id: impl Into<String>,
        entity_name: impl Into<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
        data: BTreeMap<String, TypedValue>,
    ) -> Self {
        let actor = actor.into();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            entity_name: entity_name.into(),
            created_at: at,
            updated_at: at,
            created_by: actor.clone(),
            updated_by: actor,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            data,
            approval: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(&self.approval, Some(state) if state.status == ApprovalStatus::Pending)
    }

    /// Flat JSON object: system fields followed by data fields
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), Value::String(self.id.to_string()));
        out.insert("tenant_id".into(), Value::String(self.tenant_id.clone()));
        out.insert("entity_name".into(), Value::String(self.entity_name.clone()));
        out.insert("created_at".into(), timestamp(&self.created_at));
        out.insert("updated_at".into(), timestamp(&self.updated_at));
        out.insert("created_by".into(), Value::String(self.created_by.clone()));
        out.insert("updated_by".into(), Value::String(self.updated_by.clone()));
        out.insert("deleted".into(), Value::Bool(self.deleted));
        if let Some(at) = &self.deleted_at {
            out.insert("deleted_at".into(), timestamp(at));
        }
        if let Some(by) = &self.deleted_by {
            out.insert("deleted_by".into(), Value::String(by.clone()));
        }
        if let Some(approval) = &self.approval {
            out.insert(
                "approval".into(),
                serde_json::to_value(approval).unwrap_or(Value::Null),
            );
        }
        for (field, value) in &self.data {
            out.insert(field.clone(), value.to_json());
        }
        Value::Object(out)
    }

    /// Data fields only, as raw JSON
    pub fn data_json(&self) -> Map<String, Value> {
        self.data.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
    }
}

fn timestamp(at: &DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

impl FieldSource for EntityRecord {
    fn field_value(&self, field: &str) -> Option<TypedValue> {
        match field {
            "id" | "_id" => Some(TypedValue::Ref(self.id.to_string())),
            "tenant_id" => Some(TypedValue::Text(self.tenant_id.clone())),
            "entity_name" => Some(TypedValue::Text(self.entity_name.clone())),
            "created_at" => Some(TypedValue::Date(self.created_at)),
            "updated_at" => Some(TypedValue::Date(self.updated_at)),
            "created_by" => Some(TypedValue::Text(self.created_by.clone())),
            "updated_by" => Some(TypedValue::Text(self.updated_by.clone())),
            "deleted" => Some(TypedValue::Bool(self.deleted)),
            "deleted_at" => self.deleted_at.map(TypedValue::Date),
            "deleted_by" => self.deleted_by.clone().map(TypedValue::Text),
            "approval.status" => self
                .approval
                .as_ref()
                .map(|a| TypedValue::Text(a.status.as_str().to_string())),
            other => self.data.get(other).cloned(),
        }
    }
}

/// Actor and time applied to a write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStamp {
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl WriteStamp {
    pub fn now(actor: impl Into<String>) -> Self {
        Self { actor: actor.into(), at: Utc::now() }
    }
}

/// Partial update; `None` removes the field
pub type RecordChanges = BTreeMap<String, Option<TypedValue>>;

/// Tenant, entity and live-record guard every operation starts from
pub fn scope(tenant_id: &str, entity_name: &str) -> Predicate {
    Predicate::all(vec![
        Predicate::eq("tenant_id", tenant_id),
        Predicate::eq("entity_name", entity_name),
        Predicate::eq("deleted", false),
    ])
}

/// Same as `scope` but selecting soft-deleted records
pub fn deleted_scope(tenant_id: &str, entity_name: &str) -> Predicate {
    Predicate::all(vec![
        Predicate::eq("tenant_id", tenant_id),
        Predicate::eq("entity_name", entity_name),
        Predicate::eq("deleted", true),
    ])
}

/// Excludes records locked by a pending approval
pub fn unlocked() -> Predicate {
    Predicate::ne("approval.status", ApprovalStatus::Pending.as_str())
}

pub fn by_id(id: Uuid) -> Predicate {
    Predicate::eq("id", TypedValue::Ref(id.to_string()))
}
