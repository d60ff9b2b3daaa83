mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use monk_records::access::{PermissionSource, RoleGrant, StaticPermissionSource};
use monk_records::observer::NotificationEvent;
use monk_records::record::ChangeType;
use monk_records::schema::MemorySchemaRegistry;
use monk_records::store::MemoryStore;
use monk_records::validation::ValidationKind;
use monk_records::{Action, EngineError, RecordService, RequestContext};

#[tokio::test]
async fn create_without_required_field_is_rejected() -> Result<()> {
    let h = common::harness()?;

    let err = h.service.create(&h.ctx("admin"), "leads", &json!({})).await.unwrap_err();
    match err {
        EngineError::Validation(e) => {
            assert_eq!(e.field, "name");
            assert_eq!(e.kind, ValidationKind::MissingField);
            assert_eq!(e.to_string(), "Name is required");
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    // Blank strings count as missing
    let err = h.service.create(&h.ctx("admin"), "leads", &json!({ "name": "  " })).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(h.notifications.settle(0).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn create_stamps_system_fields_and_converts_values() -> Result<()> {
    let h = common::harness()?;

    let created = h
        .service
        .create(
            &h.ctx("admin"),
            "leads",
            &json!({ "name": "Acme", "age": "42", "status": "new", "salary": "1200.50", "met_on": "2024-03-01" }),
        )
        .await?;

    assert!(created["id"].as_str().is_some());
    assert_eq!(created["tenant_id"], "acme");
    assert_eq!(created["created_by"], "admin");
    assert_eq!(created["deleted"], false);
    assert_eq!(created["age"], 42);
    assert_eq!(created["status"], "new");
    assert!(created["met_on"].as_str().unwrap().starts_with("2024-03-01T00:00:00"));

    let notes = h.notifications.wait_for(1).await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].event, NotificationEvent::RecordCreated);
    assert_eq!(notes[0].entity, "leads");

    let audit = h.audit.entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, Action::Create);
    assert!(audit[0].changes.iter().all(|c| c.change_type == ChangeType::Added));
    Ok(())
}

#[tokio::test]
async fn invalid_values_name_the_field() -> Result<()> {
    let h = common::harness()?;
    let ctx = h.ctx("admin");

    let err = h.service.create(&ctx, "leads", &json!({ "name": "A", "age": "old" })).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TYPE");
    assert_eq!(err.to_json()["field"], "age");

    let err = h.service.create(&ctx, "leads", &json!({ "name": "A", "status": "maybe" })).await.unwrap_err();
    assert_eq!(err.to_json()["field"], "status");
    Ok(())
}

#[tokio::test]
async fn system_and_unknown_fields_are_not_writable() -> Result<()> {
    let h = common::harness()?;
    let ctx = h.ctx("admin");

    let err = h.service.create(&ctx, "leads", &json!({ "name": "A", "created_by": "mallory" })).await.unwrap_err();
    assert!(matches!(err, EngineError::FieldNotWritable { ref field } if field == "created_by"));

    let err = h.service.create(&ctx, "leads", &json!({ "name": "A", "nickname": "x" })).await.unwrap_err();
    assert!(matches!(err, EngineError::FieldNotWritable { ref field } if field == "nickname"));

    let err = h.service.create(&ctx, "leads", &json!(["not", "an", "object"])).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
    Ok(())
}

#[tokio::test]
async fn lookup_must_reference_a_live_record() -> Result<()> {
    let h = common::harness()?;
    let ctx = h.ctx("admin");

    let missing = uuid::Uuid::new_v4().to_string();
    let err = h
        .service
        .create(&ctx, "leads", &json!({ "name": "A", "account": missing }))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReferenceNotFound { ref field, .. } if field == "account"));

    let account = h.seed("accounts", json!({ "name": "Globex" })).await?;
    h.service.create(&ctx, "leads", &json!({ "name": "A", "account": account })).await?;

    h.service.delete(&ctx, "accounts", &account).await?;
    let err = h
        .service
        .create(&ctx, "leads", &json!({ "name": "B", "account": account }))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReferenceNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn update_applies_supplied_fields_and_reports_diff() -> Result<()> {
    let h = common::harness()?;
    let ctx = h.ctx("admin");
    let id = h.seed("leads", json!({ "name": "Acme", "age": 30, "status": "new" })).await?;

    let updated = h.service.update(&ctx, "leads", &id, &json!({ "status": "won", "age": null })).await?;
    assert_eq!(updated["status"], "won");
    assert!(updated.get("age").is_none());
    assert_eq!(updated["name"], "Acme");

    let audit = h.audit.entries();
    let last = audit.last().unwrap();
    assert_eq!(last.action, Action::Update);
    let fields: Vec<&str> = last.changes.iter().map(|c| c.field.as_str()).collect();
    assert!(fields.contains(&"status"));
    assert!(fields.contains(&"age"));
    assert!(!fields.contains(&"name"));

    let notes = h.notifications.wait_for(2).await;
    assert_eq!(notes.last().unwrap().event, NotificationEvent::RecordUpdated);
    Ok(())
}

#[tokio::test]
async fn update_cannot_clear_required_field() -> Result<()> {
    let h = common::harness()?;
    let id = h.seed("leads", json!({ "name": "Acme" })).await?;

    let err = h.service.update(&h.ctx("admin"), "leads", &id, &json!({ "name": "" })).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let record = h.service.get(&h.ctx("admin"), "leads", &id).await?;
    assert_eq!(record["name"], "Acme");
    Ok(())
}

#[tokio::test]
async fn delete_hides_record_and_restore_brings_it_back() -> Result<()> {
    let h = common::harness()?;
    let ctx = h.ctx("admin");
    let id = h.seed("leads", json!({ "name": "Acme" })).await?;

    let deleted = h.service.delete(&ctx, "leads", &id).await?;
    assert_eq!(deleted["deleted"], true);
    assert_eq!(deleted["deleted_by"], "admin");

    let err = h.service.get(&ctx, "leads", &id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    let err = h.service.delete(&ctx, "leads", &id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let restored = h.service.restore(&ctx, "leads", &id).await?;
    assert_eq!(restored["deleted"], false);
    assert_eq!(h.service.get(&ctx, "leads", &id).await?["name"], "Acme");

    // Restoring a live record finds nothing to restore
    let err = h.service.restore(&ctx, "leads", &id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let actions: Vec<Action> = h.audit.entries().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![Action::Create, Action::Delete, Action::Update]);

    // Delete is not an automation trigger
    assert_eq!(h.notifications.settle(1).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_and_foreign_ids_are_not_found() -> Result<()> {
    let h = common::harness()?;
    let id = h.seed("leads", json!({ "name": "Acme" })).await?;

    let err = h.service.get(&h.ctx("admin"), "leads", "not-a-uuid").await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    // Same id, other tenant
    let other = RequestContext::new("globex", "admin");
    h.permissions.assign("globex", "admin", "admin");
    let err = h.service.get(&other, "leads", &id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    // Same id, other entity
    let err = h.service.get(&h.ctx("admin"), "accounts", &id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    Ok(())
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_write() -> Result<()> {
    let h = common::harness()?;
    h.audit.fail.store(true, Ordering::SeqCst);

    let created = h.service.create(&h.ctx("admin"), "leads", &json!({ "name": "Acme" })).await?;
    assert_eq!(created["name"], "Acme");
    assert!(h.audit.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_entity_is_not_found() -> Result<()> {
    let h = common::harness()?;
    let err = h.service.create(&h.ctx("admin"), "ghosts", &json!({})).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    Ok(())
}

/// Permission source that answers slower than any sane deadline
struct SlowPermissions(StaticPermissionSource);

#[async_trait]
impl PermissionSource for SlowPermissions {
    async fn roles_for(&self, ctx: &RequestContext) -> Result<Vec<RoleGrant>, EngineError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.0.roles_for(ctx).await
    }
}

#[tokio::test]
async fn operations_stop_at_the_request_deadline() -> Result<()> {
    let registry = Arc::new(MemorySchemaRegistry::from_yaml_str(common::SCHEMA)?);
    let store = Arc::new(MemoryStore::new());
    let roles = StaticPermissionSource::from_yaml_str(common::ROLES)?;
    roles.assign(common::TENANT, "admin", "admin");
    let service = RecordService::new(registry, store, Arc::new(SlowPermissions(roles)));

    let ctx = RequestContext::new(common::TENANT, "admin").with_timeout(Duration::from_millis(20));
    let err = service.create(&ctx, "leads", &json!({ "name": "Acme" })).await.unwrap_err();
    assert!(matches!(err, EngineError::DeadlineExceeded));
    assert_eq!(err.status_code(), 504);

    let ctx = RequestContext::new(common::TENANT, "admin").with_timeout(Duration::from_secs(5));
    service.create(&ctx, "leads", &json!({ "name": "Acme" })).await?;
    Ok(())
}
