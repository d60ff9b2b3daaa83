use std::fmt;

use crate::schema::FieldDefinition;

/// What was wrong with a field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    MissingField,
    InvalidType { expected: &'static str },
    InvalidFormat { expected: &'static str },
    InvalidOption { allowed: Vec<String> },
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationKind::MissingField => write!(f, "is required"),
            ValidationKind::InvalidType { expected } => write!(f, "must be a {}", expected),
            ValidationKind::InvalidFormat { expected } => write!(f, "must be a valid {}", expected),
            ValidationKind::InvalidOption { allowed } => {
                write!(f, "must be one of: {}", allowed.join(", "))
            }
        }
    }
}

impl ValidationKind {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationKind::MissingField => "MISSING_FIELD",
            ValidationKind::InvalidType { .. } => "INVALID_TYPE",
            ValidationKind::InvalidFormat { .. } => "INVALID_FORMAT",
            ValidationKind::InvalidOption { .. } => "INVALID_OPTION",
        }
    }
}

/// Field-level validation failure, carrying the label users see
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{label} {kind}")]
pub struct ValidationError {
    pub field: String,
    pub label: String,
    pub kind: ValidationKind,
}

impl ValidationError {
    pub fn new(field: &FieldDefinition, kind: ValidationKind) -> Self {
        Self {
            field: field.name.clone(),
            label: field.display_label().to_string(),
            kind,
        }
    }

    pub fn missing(field: &FieldDefinition) -> Self {
        Self::new(field, ValidationKind::MissingField)
    }

    pub fn invalid_type(field: &FieldDefinition, expected: &'static str) -> Self {
        Self::new(field, ValidationKind::InvalidType { expected })
    }

    pub fn invalid_format(field: &FieldDefinition, expected: &'static str) -> Self {
        Self::new(field, ValidationKind::InvalidFormat { expected })
    }
}
