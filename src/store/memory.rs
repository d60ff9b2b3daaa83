use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{ListQuery, Persistence, StoreError};
use crate::filter::{FieldSource, Predicate, SortDirection, SortSpec};
use crate::record::{ApprovalState, EntityRecord, RecordChanges, WriteStamp};
use crate::schema::EntityDefinition;

/// In-process store evaluating predicates directly against records.
///
/// Guarded writes check the guard and apply the change under one write
/// lock, so a concurrent approval submission cannot slip in between.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, EntityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Apply `write` to the record with `id` when it matches `guard`
    async fn guarded<F>(&self, entity: &EntityDefinition, id: Uuid, guard: &Predicate, write: F) -> Option<EntityRecord>
    where
        F: FnOnce(&mut EntityRecord) + Send,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id)?;
        if record.entity_name != entity.name || !guard.matches(&*record) {
            debug!(%id, entity = %entity.name, "Guarded write skipped");
            return None;
        }
        write(record);
        Some(record.clone())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn create(&self, _entity: &EntityDefinition, record: EntityRecord) -> Result<EntityRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<Option<EntityRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.entity_name == entity.name && predicate.matches(*r))
            .cloned())
    }

    async fn list(&self, entity: &EntityDefinition, query: &ListQuery) -> Result<Vec<EntityRecord>, StoreError> {
        let predicate = query.effective_predicate();
        let records = self.records.read().await;
        let mut rows: Vec<EntityRecord> = records
            .values()
            .filter(|r| r.entity_name == entity.name && predicate.matches(*r))
            .cloned()
            .collect();
        drop(records);

        rows.sort_by(|a, b| compare_records(a, b, &query.sort));
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.entity_name == entity.name && predicate.matches(*r))
            .count() as u64)
    }

    async fn update(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        changes: &RecordChanges,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .guarded(entity, id, guard, |record| {
                for (field, value) in changes {
                    match value {
                        Some(value) => {
                            record.data.insert(field.clone(), value.clone());
                        }
                        None => {
                            record.data.remove(field);
                        }
                    }
                }
                record.updated_at = stamp.at;
                record.updated_by = stamp.actor.clone();
            })
            .await)
    }

    async fn soft_delete(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .guarded(entity, id, guard, |record| {
                record.deleted = true;
                record.deleted_at = Some(stamp.at);
                record.deleted_by = Some(stamp.actor.clone());
            })
            .await)
    }

    async fn restore(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .guarded(entity, id, guard, |record| {
                record.deleted = false;
                record.deleted_at = None;
                record.deleted_by = None;
                record.updated_at = stamp.at;
                record.updated_by = stamp.actor.clone();
            })
            .await)
    }

    async fn set_approval(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        state: Option<ApprovalState>,
    ) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .guarded(entity, id, &Predicate::Always, |record| record.approval = state)
            .await)
    }
}

// Missing values sort last ascending and first descending, as Postgres does
fn compare_records(a: &EntityRecord, b: &EntityRecord, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ordering = match (a.field_value(&spec.field), b.field_value(&spec.field)) {
            (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match spec.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}
