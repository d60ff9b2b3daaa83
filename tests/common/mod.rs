#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use monk_records::access::StaticPermissionSource;
use monk_records::observer::{
    AuditSink, EntityWorkflows, Notification, NotificationDispatcher, Notifier, ObserverError,
};
use monk_records::populate::{FileInfo, FileResolver, PopulateError};
use monk_records::record::FieldChange;
use monk_records::schema::MemorySchemaRegistry;
use monk_records::store::MemoryStore;
use monk_records::{Action, RecordService, RequestContext};

pub const TENANT: &str = "acme";

pub const SCHEMA: &str = r#"
- name: accounts
  fields:
    - { name: name, label: Name, type: text, required: true }
- name: leads
  fields:
    - { name: name, label: Name, type: text, required: true }
    - { name: age, label: Age, type: number }
    - { name: status, label: Status, type: select, options: [new, won, lost] }
    - { name: salary, label: Salary, type: currency }
    - { name: owner, label: Owner, type: text }
    - { name: ssn, label: SSN, type: text }
    - { name: met_on, label: Met On, type: date }
    - { name: account, label: Account, type: lookup, lookup: { entity: accounts, label_field: name } }
    - { name: attachment, label: Attachment, type: file }
- name: expenses
  fields:
    - { name: title, label: Title, type: text, required: true }
    - { name: amount, label: Amount, type: currency }
"#;

pub const ROLES: &str = r#"
- role: admin
  entities:
    "*":
      create: { allowed: true }
      read: { allowed: true, ui_filters: [name, status, age, owner, met_on, id] }
      update: { allowed: true }
      delete: { allowed: true }
- role: sales
  entities:
    leads:
      create:
        allowed: true
      read:
        allowed: true
        ui_filters: [name, status]
        condition: { compare: { field: owner, op: eq, value: "$user.id" } }
        field_rules: { salary: none, ssn: none }
      update:
        allowed: true
        condition: { compare: { field: owner, op: eq, value: "$user.id" } }
        field_rules: { owner: read_only }
- role: viewer
  entities:
    leads:
      read:
        allowed: true
        ui_filters: [name]
"#;

/// Notifier that keeps everything it receives
#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until `count` notifications arrived or a second passed
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        self.wait_for_within(count, Duration::from_secs(1)).await
    }

    /// Give the worker a short window to deliver anything beyond what is expected
    pub async fn settle(&self, expected: usize) -> Vec<Notification> {
        self.wait_for_within(expected + 1, Duration::from_millis(100)).await
    }

    pub async fn wait_for_within(&self, count: usize, within: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + within;
        while self.received.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), ObserverError> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: Action,
    pub entity: String,
    pub record_id: Uuid,
    pub changes: Vec<FieldChange>,
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn log_change(
        &self,
        _ctx: &RequestContext,
        action: Action,
        entity: &str,
        record_id: Uuid,
        changes: &[FieldChange],
    ) -> Result<(), ObserverError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ObserverError::AuditError("audit store offline".to_string()));
        }
        self.entries.lock().unwrap().push(AuditEntry {
            action,
            entity: entity.to_string(),
            record_id,
            changes: changes.to_vec(),
        });
        Ok(())
    }
}

/// Knows exactly one file, `file-1`
pub struct StaticFiles;

#[async_trait]
impl FileResolver for StaticFiles {
    async fn resolve(&self, _tenant_id: &str, file_id: &str) -> Result<Option<FileInfo>, PopulateError> {
        if file_id == "file-1" {
            Ok(Some(FileInfo {
                id: file_id.to_string(),
                original_name: "contract.pdf".to_string(),
                url: "https://files.example.com/acme/file-1".to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

pub struct Harness {
    pub service: RecordService,
    pub store: Arc<MemoryStore>,
    pub permissions: Arc<StaticPermissionSource>,
    pub notifications: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
    _worker: JoinHandle<()>,
}

impl Harness {
    pub fn ctx(&self, user: &str) -> RequestContext {
        RequestContext::new(TENANT, user)
    }

    /// Create as admin and return the new id
    pub async fn seed(&self, entity: &str, payload: Value) -> Result<String> {
        let created = self.service.create(&self.ctx("admin"), entity, &payload).await?;
        Ok(created["id"].as_str().unwrap_or_default().to_string())
    }
}

/// Service over an in-memory store with users `admin`, `alice`, `bob`
/// (both sales) and `vera` (viewer); `expenses` enter an approval workflow
pub fn harness() -> Result<Harness> {
    let registry = Arc::new(MemorySchemaRegistry::from_yaml_str(SCHEMA)?);
    let store = Arc::new(MemoryStore::new());

    let permissions = Arc::new(StaticPermissionSource::from_yaml_str(ROLES)?);
    permissions.assign(TENANT, "admin", "admin");
    permissions.assign(TENANT, "alice", "sales");
    permissions.assign(TENANT, "bob", "sales");
    permissions.assign(TENANT, "vera", "viewer");

    let notifications = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAudit::default());
    let notifier: Arc<dyn Notifier> = notifications.clone();
    let (dispatcher, worker) = NotificationDispatcher::spawn(vec![notifier], 64, Duration::from_millis(500));

    let service = RecordService::new(registry, store.clone(), permissions.clone())
        .with_audit(audit.clone())
        .with_approvals(Arc::new(EntityWorkflows::new().workflow("expenses", "wf-expense-approval")))
        .with_dispatcher(dispatcher)
        .with_files(Arc::new(StaticFiles));

    Ok(Harness {
        service,
        store,
        permissions,
        notifications,
        audit,
        _worker: worker,
    })
}
