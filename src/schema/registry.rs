use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{EntityDefinition, FieldType};
use crate::record::SYSTEM_FIELDS;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Invalid entity definition: {0}")]
    InvalidFormat(String),
    #[error("Entity already exists: {0}")]
    AlreadyExists(String),
    #[error("Field '{0}' collides with a system field")]
    SystemFieldCollision(String),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only source of entity definitions
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn find_entity(&self, name: &str) -> Result<Arc<EntityDefinition>, SchemaError>;
}

/// In-process registry, loaded at startup and shared across requests
#[derive(Debug, Default)]
pub struct MemorySchemaRegistry {
    entities: RwLock<HashMap<String, Arc<EntityDefinition>>>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML list of entity definitions
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let definitions: Vec<EntityDefinition> = serde_yaml::from_str(yaml)?;
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn register(&self, definition: EntityDefinition) -> Result<(), SchemaError> {
        Self::validate(&definition)?;

        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        if entities.contains_key(&definition.name) {
            return Err(SchemaError::AlreadyExists(definition.name));
        }

        tracing::debug!(
            "Registered entity '{}' with {} fields",
            definition.name,
            definition.fields.len()
        );
        entities.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn entity_names(&self) -> Vec<String> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = entities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Structural checks applied before an entity becomes visible
    pub fn validate(definition: &EntityDefinition) -> Result<(), SchemaError> {
        if !is_identifier(&definition.name) {
            return Err(SchemaError::InvalidFormat(format!(
                "Invalid entity name format: {}",
                definition.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &definition.fields {
            if !is_identifier(&field.name) {
                return Err(SchemaError::InvalidFormat(format!(
                    "Invalid field name format: {}",
                    field.name
                )));
            }
            if SYSTEM_FIELDS.contains(&field.name.as_str()) || field.name == "_id" {
                return Err(SchemaError::SystemFieldCollision(field.name.clone()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::InvalidFormat(format!(
                    "Duplicate field '{}' in entity '{}'",
                    field.name, definition.name
                )));
            }
            if field.field_type == FieldType::Lookup && field.lookup.is_none() {
                return Err(SchemaError::InvalidFormat(format!(
                    "Lookup field '{}' has no target entity",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaRegistry for MemorySchemaRegistry {
    async fn find_entity(&self, name: &str) -> Result<Arc<EntityDefinition>, SchemaError> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        entities
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
