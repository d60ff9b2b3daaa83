use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::error::ObserverError;
use crate::record::{ApprovalState, EntityRecord, FieldChange};
use crate::schema::EntityDefinition;
use crate::types::{Action, RequestContext};

/// Receives the field-level change log of every successful write
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_change(
        &self,
        ctx: &RequestContext,
        action: Action,
        entity: &str,
        record_id: Uuid,
        changes: &[FieldChange],
    ) -> Result<(), ObserverError>;
}

/// Decides whether a new record enters an approval workflow
#[async_trait]
pub trait ApprovalInitializer: Send + Sync {
    async fn initialize_approval(
        &self,
        ctx: &RequestContext,
        entity: &EntityDefinition,
        record: &EntityRecord,
    ) -> Result<Option<ApprovalState>, ObserverError>;
}

/// Automation or webhook delivery target
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<(), ObserverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationEvent {
    #[serde(rename = "record.created")]
    RecordCreated,
    #[serde(rename = "record.updated")]
    RecordUpdated,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::RecordCreated => "record.created",
            NotificationEvent::RecordUpdated => "record.updated",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to notifiers after a successful write
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub tenant_id: String,
    pub entity: String,
    pub record_id: Uuid,
    pub actor: String,
    /// Full record after the write
    pub record: Value,
    pub changes: Vec<FieldChange>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: NotificationEvent, ctx: &RequestContext, record: &EntityRecord, changes: Vec<FieldChange>) -> Self {
        Self {
            event,
            tenant_id: ctx.tenant_id.clone(),
            entity: record.entity_name.clone(),
            record_id: record.id,
            actor: ctx.user_id.clone(),
            record: record.to_json(),
            changes,
            at: Utc::now(),
        }
    }
}
