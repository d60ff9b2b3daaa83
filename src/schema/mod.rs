// Entity and field definitions for runtime-defined record types

pub mod registry;

pub use registry::{MemorySchemaRegistry, SchemaError, SchemaRegistry};

use serde::{Deserialize, Serialize};

/// Field type tag as written in entity definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Date,
    Email,
    Url,
    Phone,
    Currency,
    Select,
    Multiselect,
    Lookup,
    File,
    Image,
    /// Any type name this engine does not know; values pass through untouched
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Types whose stored value is a plain string, so substring matching makes sense
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            FieldType::Text
                | FieldType::Textarea
                | FieldType::Email
                | FieldType::Url
                | FieldType::Phone
                | FieldType::Select
        )
    }

    /// Types that keep an empty string instead of treating it as absent
    pub fn keeps_empty_string(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Textarea)
    }

    /// Types stored as a reference id
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Lookup | FieldType::File | FieldType::Image)
    }
}

/// Target of a lookup field: which entity, and which of its fields to show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTarget {
    pub entity: String,
    #[serde(default = "LookupTarget::default_label_field")]
    pub label_field: String,
}

impl LookupTarget {
    fn default_label_field() -> String {
        "name".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupTarget>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            field_type,
            required: false,
            options: None,
            lookup: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn lookup(mut self, entity: impl Into<String>, label_field: impl Into<String>) -> Self {
        self.lookup = Some(LookupTarget {
            entity: entity.into(),
            label_field: label_field.into(),
        });
        self
    }

    /// Label for error messages, falling back to the field name
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub fields: Vec<FieldDefinition>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_definition_from_yaml() {
        let yaml = r#"
name: leads
fields:
  - name: name
    label: Full Name
    type: text
    required: true
  - name: stage
    type: select
    options: [new, won, lost]
  - name: owner
    type: lookup
    lookup:
      entity: users
  - name: rating
    type: stars
"#;
        let entity: EntityDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entity.fields.len(), 4);
        assert_eq!(entity.fields[0].display_label(), "Full Name");
        assert!(entity.fields[0].required);
        assert_eq!(entity.fields[1].display_label(), "stage");
        assert_eq!(entity.fields[2].lookup.as_ref().unwrap().label_field, "name");
        assert_eq!(entity.fields[3].field_type, FieldType::Other);
    }

    #[test]
    fn test_text_like_types() {
        assert!(FieldType::Email.is_text_like());
        assert!(!FieldType::Number.is_text_like());
        assert!(FieldType::Textarea.keeps_empty_string());
        assert!(!FieldType::Email.keeps_empty_string());
        assert!(FieldType::Image.is_reference());
    }
}
