// Read-time expansion of lookup and file references

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::filter::Predicate;
use crate::record::{scope, EntityRecord};
use crate::schema::{EntityDefinition, FieldDefinition, FieldType, SchemaError, SchemaRegistry};
use crate::store::{ListQuery, Persistence, StoreError};
use crate::types::RequestContext;
use crate::validation::TypedValue;

#[derive(Debug, Error)]
pub enum PopulateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stored file metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub original_name: String,
    pub url: String,
}

/// File storage collaborator
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &str, file_id: &str) -> Result<Option<FileInfo>, PopulateError>;
}

/// Replaces lookup ids with `{id, display_label}` and file ids with
/// `{id, original_name, url}`. Failures leave the raw id in place.
#[derive(Clone)]
pub struct Populator {
    registry: Arc<dyn SchemaRegistry>,
    store: Arc<dyn Persistence>,
    files: Option<Arc<dyn FileResolver>>,
}

impl Populator {
    pub fn new(registry: Arc<dyn SchemaRegistry>, store: Arc<dyn Persistence>) -> Self {
        Self { registry, store, files: None }
    }

    pub fn with_files(mut self, files: Arc<dyn FileResolver>) -> Self {
        self.files = Some(files);
        self
    }

    /// Flat JSON objects for `records`, with references expanded
    pub async fn populate(
        &self,
        ctx: &RequestContext,
        entity: &EntityDefinition,
        records: &[EntityRecord],
    ) -> Vec<Map<String, Value>> {
        let mut objects: Vec<Map<String, Value>> = records
            .iter()
            .map(|r| match r.to_json() {
                Value::Object(map) => map,
                _ => Map::new(),
            })
            .collect();

        for field in entity.fields.iter().filter(|f| f.field_type.is_reference()) {
            if field.field_type == FieldType::Lookup {
                if let Err(e) = self.populate_lookup(ctx, field, records, &mut objects).await {
                    warn!(field = %field.name, "Lookup population failed: {}", e);
                }
            } else {
                self.populate_files(ctx, field, records, &mut objects).await;
            }
        }
        objects
    }

    async fn populate_lookup(
        &self,
        ctx: &RequestContext,
        field: &FieldDefinition,
        records: &[EntityRecord],
        objects: &mut [Map<String, Value>],
    ) -> Result<(), PopulateError> {
        let Some(target) = &field.lookup else {
            return Ok(());
        };

        let ids: BTreeSet<String> = records
            .iter()
            .filter_map(|r| r.data.get(&field.name).and_then(TypedValue::as_str).map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        // One batched read per field
        let target_entity = self.registry.find_entity(&target.entity).await?;
        let query = ListQuery {
            predicate: scope(&ctx.tenant_id, &target_entity.name),
            forced: Predicate::In {
                field: "id".to_string(),
                values: ids.iter().cloned().map(TypedValue::Ref).collect(),
                negated: false,
            },
            limit: ids.len() as u32,
            offset: 0,
            sort: Vec::new(),
        };
        let targets = self.store.list(&target_entity, &query).await?;

        let labels: HashMap<String, Value> = targets
            .iter()
            .map(|t| {
                let label = t
                    .data
                    .get(&target.label_field)
                    .map(TypedValue::to_json)
                    .unwrap_or_else(|| Value::String(t.id.to_string()));
                (t.id.to_string(), label)
            })
            .collect();
        debug!(field = %field.name, requested = ids.len(), found = labels.len(), "Populated lookup field");

        for (record, object) in records.iter().zip(objects.iter_mut()) {
            let Some(id) = record.data.get(&field.name).and_then(TypedValue::as_str) else {
                continue;
            };
            if let Some(label) = labels.get(id) {
                object.insert(field.name.clone(), json!({ "id": id, "display_label": label }));
            }
        }
        Ok(())
    }

    async fn populate_files(
        &self,
        ctx: &RequestContext,
        field: &FieldDefinition,
        records: &[EntityRecord],
        objects: &mut [Map<String, Value>],
    ) {
        let Some(files) = &self.files else {
            return;
        };
        let lookups = records.iter().enumerate().filter_map(|(i, record)| {
            let file_id = record.data.get(&field.name).and_then(TypedValue::as_str)?;
            Some(async move { (i, file_id, files.resolve(&ctx.tenant_id, file_id).await) })
        });

        for (i, file_id, result) in join_all(lookups).await {
            match result {
                Ok(Some(info)) => {
                    objects[i].insert(
                        field.name.clone(),
                        json!({ "id": info.id, "original_name": info.original_name, "url": info.url }),
                    );
                }
                Ok(None) => debug!(field = %field.name, file_id, "File not found; leaving id"),
                Err(e) => warn!(field = %field.name, file_id, "File resolution failed: {}", e),
            }
        }
    }
}
