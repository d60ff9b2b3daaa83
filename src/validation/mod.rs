// Field value typing and validation

pub mod convert;
pub mod error;
pub mod value;

pub use convert::{convert_value, parse_bool, parse_date, parse_number, reference_id, split_values};
pub use error::{ValidationError, ValidationKind};
pub use value::TypedValue;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::record::{by_id, scope};
use crate::schema::{FieldDefinition, FieldType, SchemaRegistry};
use crate::store::Persistence;
use crate::types::RequestContext;

/// Converts payload values and verifies lookup targets exist
pub struct Validator<'a> {
    registry: &'a dyn SchemaRegistry,
    store: &'a dyn Persistence,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a dyn SchemaRegistry, store: &'a dyn Persistence) -> Self {
        Self { registry, store }
    }

    /// `convert_value` plus one existence read for lookup fields: the
    /// referenced record must be live and belong to the caller's tenant
    pub async fn convert(
        &self,
        ctx: &RequestContext,
        field: &FieldDefinition,
        raw: &Value,
    ) -> Result<Option<TypedValue>, EngineError> {
        let Some(value) = convert_value(field, raw)? else {
            return Ok(None);
        };

        if field.field_type == FieldType::Lookup {
            if let (Some(target), TypedValue::Ref(id)) = (&field.lookup, &value) {
                let target_entity = self.registry.find_entity(&target.entity).await?;
                let id_value = Uuid::parse_str(id).map_err(|_| ValidationError::invalid_format(field, "record identifier"))?;
                let predicate = scope(&ctx.tenant_id, &target_entity.name).and(by_id(id_value));
                let found = self.store.count(&target_entity, &predicate).await?;
                debug!(field = %field.name, target = %target.entity, %id, found, "Checked lookup reference");
                if found == 0 {
                    return Err(EngineError::ReferenceNotFound {
                        field: field.name.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        Ok(Some(value))
    }
}
