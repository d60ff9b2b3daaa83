use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::{AccessGate, FieldMask, PermissionSource, UserAccess};
use crate::condition::VariableContext;
use crate::error::EngineError;
use crate::filter::{Filter, FilterCompiler, FilterOrder, Predicate, SortSpec};
use crate::observer::{
    ApprovalInitializer, AuditSink, NoApproval, Notification, NotificationDispatcher,
    NotificationEvent, TracingAuditSink,
};
use crate::populate::{FileResolver, Populator};
use crate::record::{
    by_id, deleted_scope, diff_created, diff_records, scope, unlocked, EntityRecord, FieldChange, RecordChanges,
    WriteStamp,
};
use crate::schema::{EntityDefinition, SchemaRegistry};
use crate::store::{ListQuery, Persistence};
use crate::types::{Action, RequestContext};
use crate::validation::{ValidationError, Validator};

/// List request as received from the controller layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Any shape `FilterOrder::parse` accepts
    #[serde(default)]
    pub sort: Option<Value>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn page(mut self, page: i64, limit: i64) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: impl Into<Value>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub data: Vec<Value>,
    pub meta: PageMeta,
}

/// Record lifecycle manager: validation, access control, approval locks
/// and side effects around every record operation
pub struct RecordService {
    registry: Arc<dyn SchemaRegistry>,
    store: Arc<dyn Persistence>,
    gate: AccessGate,
    populator: Populator,
    audit: Arc<dyn AuditSink>,
    approvals: Arc<dyn ApprovalInitializer>,
    dispatcher: Option<NotificationDispatcher>,
}

impl RecordService {
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        store: Arc<dyn Persistence>,
        permissions: Arc<dyn PermissionSource>,
    ) -> Self {
        Self {
            populator: Populator::new(registry.clone(), store.clone()),
            registry,
            store,
            gate: AccessGate::new(permissions),
            audit: Arc::new(TracingAuditSink),
            approvals: Arc::new(NoApproval),
            dispatcher: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalInitializer>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileResolver>) -> Self {
        self.populator = self.populator.with_files(files);
        self
    }

    pub async fn create(&self, ctx: &RequestContext, entity: &str, payload: &Value) -> Result<Value, EngineError> {
        self.bounded(ctx, self.create_inner(ctx, entity, payload)).await
    }

    pub async fn get(&self, ctx: &RequestContext, entity: &str, id: &str) -> Result<Value, EngineError> {
        self.bounded(ctx, self.get_inner(ctx, entity, id)).await
    }

    pub async fn list(&self, ctx: &RequestContext, entity: &str, request: &ListRequest) -> Result<ListResponse, EngineError> {
        self.bounded(ctx, self.list_inner(ctx, entity, request)).await
    }

    pub async fn update(&self, ctx: &RequestContext, entity: &str, id: &str, payload: &Value) -> Result<Value, EngineError> {
        self.bounded(ctx, self.update_inner(ctx, entity, id, payload)).await
    }

    pub async fn delete(&self, ctx: &RequestContext, entity: &str, id: &str) -> Result<Value, EngineError> {
        self.bounded(ctx, self.delete_inner(ctx, entity, id)).await
    }

    /// Clear the soft-delete flag; requires delete permission
    pub async fn restore(&self, ctx: &RequestContext, entity: &str, id: &str) -> Result<Value, EngineError> {
        self.bounded(ctx, self.restore_inner(ctx, entity, id)).await
    }

    /// Run under the request deadline, or the configured default
    async fn bounded<T, F>(&self, ctx: &RequestContext, operation: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + crate::config::CONFIG.request.default_timeout());
        match timeout_at(deadline, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tenant = %ctx.tenant_id, user = %ctx.user_id, "Request deadline exceeded");
                Err(EngineError::DeadlineExceeded)
            }
        }
    }

    async fn create_inner(&self, ctx: &RequestContext, entity_name: &str, payload: &Value) -> Result<Value, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let permission = access.authorize(&entity.name, Action::Create)?;
        let read_mask = access.field_mask(&entity)?;
        let write_mask = read_mask.restrict(&permission.field_rules);

        let payload = as_object(payload)?;
        write_mask.check_writable(payload)?;

        for field in entity.required_fields() {
            if payload.get(&field.name).map(is_blank).unwrap_or(true) {
                return Err(ValidationError::missing(field).into());
            }
        }

        let validator = Validator::new(self.registry.as_ref(), self.store.as_ref());
        let mut data = BTreeMap::new();
        for field in &entity.fields {
            if let Some(raw) = payload.get(&field.name) {
                if let Some(value) = validator.convert(ctx, field, raw).await? {
                    data.insert(field.name.clone(), value);
                }
            }
        }

        let mut record = EntityRecord::new(&ctx.tenant_id, &entity.name, &ctx.user_id, chrono::Utc::now(), data);
        record.approval = self.approvals.initialize_approval(ctx, &entity, &record).await?;

        let created = self.store.create(&entity, record).await?;
        info!(entity = %entity.name, id = %created.id, user = %ctx.user_id, "Record created");

        self.audit(ctx, Action::Create, &entity.name, created.id, diff_created(&created)).await;
        self.notify(NotificationEvent::RecordCreated, ctx, &created, diff_created(&created));

        Ok(render(&read_mask, record_object(&created)))
    }

    async fn get_inner(&self, ctx: &RequestContext, entity_name: &str, id: &str) -> Result<Value, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let forced = self.forced(ctx, &access, &entity, Action::Read)?;
        let mask = access.field_mask(&entity)?;
        let id = parse_id(&entity, id)?;

        let predicate = Predicate::all(vec![scope(&ctx.tenant_id, &entity.name), by_id(id), forced]);
        let record = self
            .store
            .get(&entity, &predicate)
            .await?
            .ok_or_else(|| not_found(&entity, id))?;

        let mut objects = self.populator.populate(ctx, &entity, std::slice::from_ref(&record)).await;
        let object = objects.pop().unwrap_or_default();
        Ok(render(&mask, object))
    }

    async fn list_inner(
        &self,
        ctx: &RequestContext,
        entity_name: &str,
        request: &ListRequest,
    ) -> Result<ListResponse, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let permission = access.authorize(&entity.name, Action::Read)?;
        AccessGate::check_filters(&permission, &request.filters)?;

        let filters = FilterCompiler::new(&entity).compile(&request.filters)?;
        let vars = VariableContext::for_request(ctx, &access.roles());
        let forced = AccessGate::forced_predicate(&permission, &vars, &entity)?;
        let mask = access.field_mask(&entity)?;

        let settings = &crate::config::CONFIG.filter;
        let page = request.page.filter(|p| *p >= 1).unwrap_or(1).min(u32::MAX as i64) as u32;
        let limit = request
            .limit
            .filter(|l| *l >= 1)
            .unwrap_or(settings.default_limit as i64)
            .min(settings.max_limit as i64)
            .max(1) as u32;
        let sort = match &request.sort {
            Some(sort) => FilterOrder::parse(sort)?,
            None => Vec::new(),
        };
        let sort = if sort.is_empty() { vec![SortSpec::desc("created_at")] } else { sort };

        let query = ListQuery {
            predicate: scope(&ctx.tenant_id, &entity.name).and(filters),
            forced,
            limit,
            offset: (page - 1).saturating_mul(limit),
            sort,
        };
        let total = self.store.count(&entity, &query.effective_predicate()).await?;
        let records = self.store.list(&entity, &query).await?;
        debug!(entity = %entity.name, total, returned = records.len(), page, limit, "Listed records");

        let data = self
            .populator
            .populate(ctx, &entity, &records)
            .await
            .into_iter()
            .map(|object| render(&mask, object))
            .collect();
        let pages = if total == 0 { 0 } else { total.div_ceil(limit as u64) };
        Ok(ListResponse { data, meta: PageMeta { total, page, limit, pages } })
    }

    async fn update_inner(
        &self,
        ctx: &RequestContext,
        entity_name: &str,
        id: &str,
        payload: &Value,
    ) -> Result<Value, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let permission = access.authorize(&entity.name, Action::Update)?;
        let forced = self.forced(ctx, &access, &entity, Action::Update)?;
        let read_mask = access.field_mask(&entity)?;
        let write_mask = read_mask.restrict(&permission.field_rules);
        let id = parse_id(&entity, id)?;

        let base = Predicate::all(vec![scope(&ctx.tenant_id, &entity.name), by_id(id), forced]);
        let before = self
            .store
            .get(&entity, &base)
            .await?
            .ok_or_else(|| not_found(&entity, id))?;
        if before.is_locked() {
            return Err(EngineError::RecordLocked { id });
        }

        let payload = as_object(payload)?;
        write_mask.check_writable(payload)?;

        let validator = Validator::new(self.registry.as_ref(), self.store.as_ref());
        let mut changes = RecordChanges::new();
        for field in &entity.fields {
            let Some(raw) = payload.get(&field.name) else {
                continue;
            };
            if field.required && is_blank(raw) {
                return Err(ValidationError::missing(field).into());
            }
            changes.insert(field.name.clone(), validator.convert(ctx, field, raw).await?);
        }

        let guard = base.and(unlocked());
        let stamp = WriteStamp::now(&ctx.user_id);
        let Some(after) = self.store.update(&entity, id, &guard, &changes, &stamp).await? else {
            return Err(self.explain_miss(ctx, &entity, id, false).await);
        };
        info!(entity = %entity.name, %id, user = %ctx.user_id, fields = changes.len(), "Record updated");

        let diffs = diff_records(&before, &after);
        self.audit(ctx, Action::Update, &entity.name, id, diffs.clone()).await;
        self.notify(NotificationEvent::RecordUpdated, ctx, &after, diffs);

        Ok(render(&read_mask, record_object(&after)))
    }

    async fn delete_inner(&self, ctx: &RequestContext, entity_name: &str, id: &str) -> Result<Value, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let forced = self.forced(ctx, &access, &entity, Action::Delete)?;
        let id = parse_id(&entity, id)?;

        let base = Predicate::all(vec![scope(&ctx.tenant_id, &entity.name), by_id(id), forced]);
        let before = self
            .store
            .get(&entity, &base)
            .await?
            .ok_or_else(|| not_found(&entity, id))?;
        if before.is_locked() {
            return Err(EngineError::RecordLocked { id });
        }

        let guard = base.and(unlocked());
        let stamp = WriteStamp::now(&ctx.user_id);
        let Some(after) = self.store.soft_delete(&entity, id, &guard, &stamp).await? else {
            return Err(self.explain_miss(ctx, &entity, id, false).await);
        };
        info!(entity = %entity.name, %id, user = %ctx.user_id, "Record deleted");

        self.audit(ctx, Action::Delete, &entity.name, id, diff_records(&before, &after)).await;

        Ok(render_after_write(&access, &entity, &after))
    }

    async fn restore_inner(&self, ctx: &RequestContext, entity_name: &str, id: &str) -> Result<Value, EngineError> {
        let entity = self.registry.find_entity(entity_name).await?;
        let access = self.gate.load(ctx).await?;
        let forced = self.forced(ctx, &access, &entity, Action::Delete)?;
        let id = parse_id(&entity, id)?;

        let base = Predicate::all(vec![deleted_scope(&ctx.tenant_id, &entity.name), by_id(id), forced]);
        let before = self
            .store
            .get(&entity, &base)
            .await?
            .ok_or_else(|| not_found(&entity, id))?;
        if before.is_locked() {
            return Err(EngineError::RecordLocked { id });
        }

        let guard = base.and(unlocked());
        let stamp = WriteStamp::now(&ctx.user_id);
        let Some(after) = self.store.restore(&entity, id, &guard, &stamp).await? else {
            return Err(self.explain_miss(ctx, &entity, id, true).await);
        };
        info!(entity = %entity.name, %id, user = %ctx.user_id, "Record restored");

        self.audit(ctx, Action::Update, &entity.name, id, diff_records(&before, &after)).await;

        Ok(render_after_write(&access, &entity, &after))
    }

    fn forced(
        &self,
        ctx: &RequestContext,
        access: &UserAccess,
        entity: &EntityDefinition,
        action: Action,
    ) -> Result<Predicate, EngineError> {
        let permission = access.authorize(&entity.name, action)?;
        let vars = VariableContext::for_request(ctx, &access.roles());
        AccessGate::forced_predicate(&permission, &vars, entity)
    }

    /// A guarded write matched nothing: the record was locked, removed or
    /// moved out of the caller's condition between the read and the write
    async fn explain_miss(&self, ctx: &RequestContext, entity: &EntityDefinition, id: Uuid, deleted: bool) -> EngineError {
        let base = if deleted {
            deleted_scope(&ctx.tenant_id, &entity.name)
        } else {
            scope(&ctx.tenant_id, &entity.name)
        };
        match self.store.get(entity, &base.and(by_id(id))).await {
            Ok(Some(record)) if record.is_locked() => EngineError::RecordLocked { id },
            Ok(_) => not_found(entity, id),
            Err(e) => e.into(),
        }
    }

    async fn audit(&self, ctx: &RequestContext, action: Action, entity: &str, id: Uuid, changes: Vec<FieldChange>) {
        if let Err(e) = self.audit.log_change(ctx, action, entity, id, &changes).await {
            warn!(%action, entity, %id, "Audit logging failed: {}", e);
        }
    }

    fn notify(&self, event: NotificationEvent, ctx: &RequestContext, record: &EntityRecord, changes: Vec<FieldChange>) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        dispatcher.dispatch(Notification::new(event, ctx, record, changes));
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, EngineError> {
    payload
        .as_object()
        .ok_or_else(|| EngineError::BadRequest("Record payload must be a JSON object".to_string()))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn parse_id(entity: &EntityDefinition, id: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(id.trim()).map_err(|_| EngineError::not_found(format!("{} record '{}' not found", entity.name, id)))
}

fn not_found(entity: &EntityDefinition, id: Uuid) -> EngineError {
    EngineError::not_found(format!("{} record '{}' not found", entity.name, id))
}

fn record_object(record: &EntityRecord) -> Map<String, Value> {
    match record.to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Callers may hold delete without read; they only get the identity back
fn render_after_write(access: &UserAccess, entity: &EntityDefinition, record: &EntityRecord) -> Value {
    match access.field_mask(entity) {
        Ok(mask) => render(&mask, record_object(record)),
        Err(_) => serde_json::json!({ "id": record.id, "deleted": record.deleted }),
    }
}

fn render(mask: &FieldMask, mut object: Map<String, Value>) -> Value {
    mask.apply(&mut object);
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_values() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!("   ")));
        assert!(is_blank(&json!([])));
        assert!(!is_blank(&json!(0)));
        assert!(!is_blank(&json!(false)));
        assert!(!is_blank(&json!("x")));
    }

    #[test]
    fn test_malformed_id_reads_as_not_found() {
        let entity = EntityDefinition::new("leads");
        let err = parse_id(&entity, "12").unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(parse_id(&entity, &Uuid::new_v4().to_string()).is_ok());
    }
}
