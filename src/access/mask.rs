use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::record::is_system_field;
use crate::schema::EntityDefinition;

/// Per-field access level; ordered from least to most permissive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    None,
    ReadOnly,
    ReadWrite,
}

impl FieldAccess {
    pub fn can_read(&self) -> bool {
        *self >= FieldAccess::ReadOnly
    }

    pub fn can_write(&self) -> bool {
        *self == FieldAccess::ReadWrite
    }
}

/// Effective access for every field of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMask {
    fields: BTreeMap<String, FieldAccess>,
}

impl FieldMask {
    /// Fields without a rule get full access
    pub fn from_rules(entity: &EntityDefinition, rules: &std::collections::HashMap<String, FieldAccess>) -> Self {
        let fields = entity
            .fields
            .iter()
            .map(|f| (f.name.clone(), rules.get(&f.name).copied().unwrap_or(FieldAccess::ReadWrite)))
            .collect();
        Self { fields }
    }

    /// Narrow to what a write action's rules also allow
    pub fn restrict(&self, rules: &std::collections::HashMap<String, FieldAccess>) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(name, access)| {
                let write = rules.get(name).copied().unwrap_or(FieldAccess::ReadWrite);
                (name.clone(), (*access).min(write))
            })
            .collect();
        Self { fields }
    }

    pub fn access(&self, field: &str) -> FieldAccess {
        self.fields.get(field).copied().unwrap_or(FieldAccess::None)
    }

    pub fn can_read(&self, field: &str) -> bool {
        self.access(field).can_read()
    }

    pub fn can_write(&self, field: &str) -> bool {
        self.access(field).can_write()
    }

    /// Reject a payload naming a system field or a field without write access
    pub fn check_writable(&self, payload: &Map<String, Value>) -> Result<(), EngineError> {
        for field in payload.keys() {
            if is_system_field(field) || !self.can_write(field) {
                return Err(EngineError::FieldNotWritable { field: field.clone() });
            }
        }
        Ok(())
    }

    /// Strip data fields the caller cannot read from a flat record object.
    /// System fields pass through.
    pub fn apply(&self, record: &mut Map<String, Value>) {
        record.retain(|key, _| is_system_field(key) || self.can_read(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};
    use serde_json::json;
    use std::collections::HashMap;

    fn entity() -> EntityDefinition {
        EntityDefinition::new("employees")
            .field(FieldDefinition::new("name", FieldType::Text))
            .field(FieldDefinition::new("salary", FieldType::Currency))
            .field(FieldDefinition::new("title", FieldType::Text))
    }

    #[test]
    fn test_read_mask_strips_hidden_fields() {
        let rules = HashMap::from([("salary".to_string(), FieldAccess::None)]);
        let mask = FieldMask::from_rules(&entity(), &rules);

        let mut record = json!({"id": "x", "name": "Ann", "salary": "100", "title": "Dev"})
            .as_object()
            .cloned()
            .unwrap();
        mask.apply(&mut record);
        assert!(record.get("salary").is_none());
        assert_eq!(record.get("name"), Some(&json!("Ann")));
        assert!(record.contains_key("id"));
    }

    #[test]
    fn test_write_needs_both_masks() {
        let read = HashMap::from([("title".to_string(), FieldAccess::ReadOnly)]);
        let write = HashMap::from([("name".to_string(), FieldAccess::ReadOnly)]);
        let mask = FieldMask::from_rules(&entity(), &read).restrict(&write);

        assert!(!mask.can_write("title"));
        assert!(!mask.can_write("name"));
        assert!(mask.can_write("salary"));
        assert!(mask.can_read("name"));

        let payload = json!({"salary": 1}).as_object().cloned().unwrap();
        assert!(mask.check_writable(&payload).is_ok());
        let payload = json!({"created_by": "me"}).as_object().cloned().unwrap();
        assert!(matches!(
            mask.check_writable(&payload),
            Err(EngineError::FieldNotWritable { ref field }) if field == "created_by"
        ));
    }

    #[test]
    fn test_unknown_fields_are_not_writable() {
        let mask = FieldMask::from_rules(&entity(), &HashMap::new());
        let payload = json!({"nickname": "A"}).as_object().cloned().unwrap();
        assert!(mask.check_writable(&payload).is_err());
    }
}
