mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use monk_records::access::StaticPermissionSource;
use monk_records::filter::{Filter, FilterOp};
use monk_records::observer::EntityWorkflows;
use monk_records::schema::MemorySchemaRegistry;
use monk_records::store::PgStore;
use monk_records::{EngineError, ListRequest, RecordService, RequestContext};

// Needs a reachable Postgres in DATABASE_URL:
//   cargo test --test 60_postgres -- --ignored
#[tokio::test]
#[ignore]
async fn record_lifecycle_against_postgres() -> Result<()> {
    dotenvy::dotenv().ok();
    let store = Arc::new(PgStore::connect_from_env().await?);
    store.ensure_schema().await?;
    store.health_check().await?;

    // Fresh tenant per run keeps rows from earlier runs out of the counts
    let tenant = format!("pg-{}", Uuid::new_v4());
    let permissions = Arc::new(StaticPermissionSource::from_yaml_str(common::ROLES)?);
    permissions.assign(&tenant, "admin", "admin");

    let service = RecordService::new(
        Arc::new(MemorySchemaRegistry::from_yaml_str(common::SCHEMA)?),
        store,
        permissions,
    )
    .with_approvals(Arc::new(EntityWorkflows::new().workflow("expenses", "wf-expense-approval")));
    let ctx = RequestContext::new(&tenant, "admin");

    for (name, age) in [("Young", 17), ("Adult", 30), ("Senior", 70)] {
        service.create(&ctx, "leads", &json!({ "name": name, "age": age, "status": "new" })).await?;
    }

    let request = ListRequest::new()
        .filter(Filter::new("age", FilterOp::Gt, 18))
        .sort("age desc");
    let listed = service.list(&ctx, "leads", &request).await?;
    let names: Vec<&str> = listed.data.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Senior", "Adult"]);
    assert_eq!(listed.meta.total, 2);

    let id = listed.data[0]["id"].as_str().unwrap().to_string();
    let updated = service.update(&ctx, "leads", &id, &json!({ "status": "won", "age": null })).await?;
    assert_eq!(updated["status"], "won");
    assert!(updated.get("age").is_none());

    service.delete(&ctx, "leads", &id).await?;
    assert_eq!(service.get(&ctx, "leads", &id).await.unwrap_err().status_code(), 404);
    service.restore(&ctx, "leads", &id).await?;

    // Approval lock holds in the UPDATE guard
    let expense = service.create(&ctx, "expenses", &json!({ "title": "Flight", "amount": "420" })).await?;
    let expense_id = expense["id"].as_str().unwrap();
    let err = service
        .update(&ctx, "expenses", expense_id, &json!({ "amount": "1" }))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RecordLocked { .. }));
    assert_eq!(service.get(&ctx, "expenses", expense_id).await?["amount"], "420");
    Ok(())
}
