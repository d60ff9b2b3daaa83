use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ListQuery, Persistence, StoreError};
use crate::filter::sql::{render_order, SqlParam, SqlWhere};
use crate::filter::Predicate;
use crate::record::{ApprovalState, EntityRecord, RecordChanges, WriteStamp};
use crate::schema::EntityDefinition;
use crate::validation::{convert_value, TypedValue};

const TABLE: &str = "entity_records";

const SCHEMA_DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS "entity_records" (
        "id" uuid PRIMARY KEY,
        "tenant_id" text NOT NULL,
        "entity_name" text NOT NULL,
        "data" jsonb NOT NULL DEFAULT '{}'::jsonb,
        "approval" jsonb,
        "created_at" timestamptz NOT NULL,
        "updated_at" timestamptz NOT NULL,
        "created_by" text NOT NULL,
        "updated_by" text NOT NULL,
        "deleted" boolean NOT NULL DEFAULT false,
        "deleted_at" timestamptz,
        "deleted_by" text
    )"#,
    r#"CREATE INDEX IF NOT EXISTS "entity_records_scope_idx"
        ON "entity_records" ("tenant_id", "entity_name", "deleted")"#,
    r#"CREATE INDEX IF NOT EXISTS "entity_records_data_idx"
        ON "entity_records" USING gin ("data")"#,
];

/// Postgres persistence: one JSONB document table shared by all entities,
/// with system fields as real columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `DATABASE_URL` and the configured pool limits
    pub async fn connect_from_env() -> Result<Self, StoreError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| StoreError::ConfigMissing("DATABASE_URL"))?;
        Self::connect(&url).await
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let settings = &crate::config::CONFIG.database;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(database_url)
            .await?;
        info!("Created record store pool ({} max connections)", settings.max_connections);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the record table and indexes when missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_all(&self, entity: &EntityDefinition, sql: &str, params: Vec<SqlParam>) -> Result<Vec<EntityRecord>, StoreError> {
        log_query(sql, &params);
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|row| hydrate(entity, row)).collect()
    }

    async fn fetch_optional(
        &self,
        entity: &EntityDefinition,
        sql: &str,
        params: Vec<SqlParam>,
    ) -> Result<Option<EntityRecord>, StoreError> {
        log_query(sql, &params);
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        match query.fetch_optional(&self.pool).await? {
            Some(row) => Ok(Some(hydrate(entity, &row)?)),
            None => Ok(None),
        }
    }

    async fn guarded_update(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        assignments: &str,
        params: Vec<SqlParam>,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let (sql, params) = guarded_update_sql(entity, id, guard, assignments, params);
        self.fetch_optional(entity, &sql, params).await
    }
}

/// `UPDATE ... SET <assignments> WHERE id AND entity AND guard RETURNING *`.
/// `params` are the ones `assignments` already refers to.
fn guarded_update_sql(
    entity: &EntityDefinition,
    id: Uuid,
    guard: &Predicate,
    assignments: &str,
    params: Vec<SqlParam>,
) -> (String, Vec<SqlParam>) {
    let mut builder = SqlWhere::new(params);
    let id_param = builder.param(SqlParam::Uuid(id));
    let entity_param = builder.param(SqlParam::Text(entity.name.clone()));
    let guard_sql = builder.render(guard);
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = {} AND \"entity_name\" = {} AND ({}) RETURNING *",
        TABLE, assignments, id_param, entity_param, guard_sql
    );
    (sql, builder.into_params())
}

#[async_trait]
impl Persistence for PgStore {
    async fn create(&self, entity: &EntityDefinition, record: EntityRecord) -> Result<EntityRecord, StoreError> {
        let approval = match &record.approval {
            Some(state) => Some(serde_json::to_value(state)?),
            None => None,
        };
        let sql = format!(
            "INSERT INTO \"{}\" (\"id\", \"tenant_id\", \"entity_name\", \"data\", \"approval\", \"created_at\", \
             \"updated_at\", \"created_by\", \"updated_by\", \"deleted\") \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false) RETURNING *",
            TABLE
        );
        let row = sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.tenant_id)
            .bind(&record.entity_name)
            .bind(Value::Object(record.data_json()))
            .bind(approval)
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(&record.created_by)
            .bind(&record.updated_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate(record.id),
                other => StoreError::Sqlx(other),
            })?;
        hydrate(entity, &row)
    }

    async fn get(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<Option<EntityRecord>, StoreError> {
        let mut builder = SqlWhere::new(Vec::new());
        let entity_param = builder.param(SqlParam::Text(entity.name.clone()));
        let where_sql = builder.render(predicate);
        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"entity_name\" = {} AND ({}) LIMIT 1",
            TABLE, entity_param, where_sql
        );
        self.fetch_optional(entity, &sql, builder.into_params()).await
    }

    async fn list(&self, entity: &EntityDefinition, query: &ListQuery) -> Result<Vec<EntityRecord>, StoreError> {
        let mut builder = SqlWhere::new(Vec::new());
        let entity_param = builder.param(SqlParam::Text(entity.name.clone()));
        let where_sql = builder.render(&query.effective_predicate());
        let mut order = render_order(entity, &query.sort);
        if order.is_empty() {
            order = "ORDER BY \"id\" ASC".to_string();
        } else {
            order.push_str(", \"id\" ASC");
        }
        let limit = builder.param(SqlParam::Integer(query.limit as i64));
        let offset = builder.param(SqlParam::Integer(query.offset as i64));
        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"entity_name\" = {} AND ({}) {} LIMIT {} OFFSET {}",
            TABLE, entity_param, where_sql, order, limit, offset
        );
        self.fetch_all(entity, &sql, builder.into_params()).await
    }

    async fn count(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<u64, StoreError> {
        let mut builder = SqlWhere::new(Vec::new());
        let entity_param = builder.param(SqlParam::Text(entity.name.clone()));
        let where_sql = builder.render(predicate);
        let sql = format!(
            "SELECT COUNT(*) AS count FROM \"{}\" WHERE \"entity_name\" = {} AND ({})",
            TABLE, entity_param, where_sql
        );
        let params = builder.into_params();
        log_query(&sql, &params);
        let mut q = sqlx::query(&sql);
        for param in params {
            q = bind_param(q, param);
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn update(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        changes: &RecordChanges,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let mut set = Map::new();
        let mut removed = Vec::new();
        for (field, value) in changes {
            match value {
                Some(value) => {
                    set.insert(field.clone(), value.to_json());
                }
                None => removed.push(field.clone()),
            }
        }
        let params = vec![
            SqlParam::TextList(removed),
            SqlParam::Json(Value::Object(set)),
            SqlParam::Timestamp(stamp.at),
            SqlParam::Text(stamp.actor.clone()),
        ];
        let assignments = "\"data\" = (\"data\" - $1::text[]) || $2::jsonb, \"updated_at\" = $3, \"updated_by\" = $4";
        self.guarded_update(entity, id, guard, assignments, params).await
    }

    async fn soft_delete(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let params = vec![SqlParam::Timestamp(stamp.at), SqlParam::Text(stamp.actor.clone())];
        let assignments = "\"deleted\" = true, \"deleted_at\" = $1, \"deleted_by\" = $2";
        self.guarded_update(entity, id, guard, assignments, params).await
    }

    async fn restore(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let params = vec![SqlParam::Timestamp(stamp.at), SqlParam::Text(stamp.actor.clone())];
        let assignments = "\"deleted\" = false, \"deleted_at\" = NULL, \"deleted_by\" = NULL, \
                           \"updated_at\" = $1, \"updated_by\" = $2";
        self.guarded_update(entity, id, guard, assignments, params).await
    }

    async fn set_approval(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        state: Option<ApprovalState>,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let state = match state {
            Some(state) => serde_json::to_value(&state)?,
            None => Value::Null,
        };
        let params = vec![SqlParam::Json(state)];
        let assignments = "\"approval\" = NULLIF($1::jsonb, 'null'::jsonb)";
        self.guarded_update(entity, id, &Predicate::Always, assignments, params).await
    }
}

fn bind_param<'q>(query: Query<'q, Postgres, PgArguments>, param: SqlParam) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Text(s) => query.bind(s),
        SqlParam::Uuid(id) => query.bind(id),
        SqlParam::Number(n) => query.bind(n),
        SqlParam::Integer(n) => query.bind(n),
        SqlParam::Bool(b) => query.bind(b),
        SqlParam::Timestamp(dt) => query.bind(dt),
        SqlParam::Decimal(d) => query.bind(d),
        SqlParam::Json(v) => query.bind(v),
        SqlParam::TextList(items) => query.bind(items),
    }
}

fn log_query(sql: &str, params: &[SqlParam]) {
    if crate::config::CONFIG.database.enable_query_logging {
        debug!(sql = %sql, params = ?params, "Executing record query");
    }
}

fn hydrate(entity: &EntityDefinition, row: &PgRow) -> Result<EntityRecord, StoreError> {
    let data = hydrate_data(entity, row.try_get("data")?)?;

    let approval: Option<Value> = row.try_get("approval")?;
    let approval = match approval {
        Some(Value::Null) | None => None,
        Some(value) => Some(serde_json::from_value::<ApprovalState>(value)?),
    };

    Ok(EntityRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        entity_name: row.try_get("entity_name")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        deleted: row.try_get("deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
        data,
        approval,
    })
}

/// Type the `data` column by the current field definitions. Values written
/// under an older definition (a dropped select option, a stricter format)
/// are kept as they were stored.
fn hydrate_data(entity: &EntityDefinition, raw: Value) -> Result<BTreeMap<String, TypedValue>, StoreError> {
    let Value::Object(raw) = raw else {
        return Err(StoreError::Corrupt("data column is not an object".to_string()));
    };

    let mut data = BTreeMap::new();
    for (name, value) in raw {
        let typed = match entity.find_field(&name) {
            Some(field) => match convert_value(field, &value) {
                Ok(typed) => typed,
                Err(e) => {
                    warn!(entity = %entity.name, field = %name, "Stored value no longer converts: {}", e);
                    Some(TypedValue::from_json(&value))
                }
            },
            None => Some(TypedValue::from_json(&value)),
        };
        if let Some(typed) = typed {
            data.insert(name, typed);
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{by_id, scope, unlocked};
    use crate::schema::{FieldDefinition, FieldType};
    use serde_json::json;

    fn leads() -> EntityDefinition {
        EntityDefinition::new("leads")
            .field(FieldDefinition::new("age", FieldType::Number))
            .field(FieldDefinition::new("stage", FieldType::Select).options(["new", "won"]))
            .field(FieldDefinition::new("email", FieldType::Email))
    }

    #[test]
    fn test_hydrate_types_known_fields() {
        let data = hydrate_data(&leads(), json!({"age": 42, "stage": "won", "extra": [1, 2]})).unwrap();
        assert_eq!(data["age"], TypedValue::Number(42.0));
        assert_eq!(data["stage"], TypedValue::Text("won".to_string()));
        assert_eq!(data["extra"], TypedValue::from_json(&json!([1, 2])));
    }

    #[test]
    fn test_hydrate_keeps_values_from_older_definitions() {
        // "lost" was removed from the options after this row was written
        let data = hydrate_data(&leads(), json!({"stage": "lost", "email": "not-an-email"})).unwrap();
        assert_eq!(data["stage"], TypedValue::Text("lost".to_string()));
        assert_eq!(data["email"], TypedValue::Text("not-an-email".to_string()));
    }

    #[test]
    fn test_hydrate_drops_nulls_and_rejects_non_objects() {
        let data = hydrate_data(&leads(), json!({"age": null})).unwrap();
        assert!(data.is_empty());
        assert!(matches!(hydrate_data(&leads(), json!([1])), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_guarded_update_numbers_params_after_assignments() {
        let id = Uuid::new_v4();
        let guard = scope("t1", "leads").and(by_id(id)).and(unlocked());
        let assignments = "\"deleted\" = true, \"deleted_at\" = $1, \"deleted_by\" = $2";
        let params = vec![SqlParam::Timestamp(Utc::now()), SqlParam::Text("u1".to_string())];

        let (sql, params) = guarded_update_sql(&leads(), id, &guard, assignments, params);

        assert!(sql.starts_with("UPDATE \"entity_records\" SET \"deleted\" = true"));
        assert!(sql.contains("WHERE \"id\" = $3 AND \"entity_name\" = $4 AND ("));
        assert!(sql.contains("NOT COALESCE((approval->>'status') = "));
        assert!(sql.ends_with(") RETURNING *"));
        assert_eq!(params[2], SqlParam::Uuid(id));
        assert_eq!(params[3], SqlParam::Text("leads".to_string()));
        assert!(params.contains(&SqlParam::Text("pending".to_string())));
        let highest = format!("${}", params.len());
        assert!(sql.contains(&highest));
    }

    #[test]
    fn test_unguarded_update_renders_tautology() {
        let (sql, params) = guarded_update_sql(&leads(), Uuid::new_v4(), &Predicate::Always, "\"approval\" = $1", vec![
            SqlParam::Json(Value::Null),
        ]);
        assert!(sql.contains("AND (1=1) RETURNING"));
        assert_eq!(params.len(), 3);
    }
}
