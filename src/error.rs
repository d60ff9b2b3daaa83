// Engine error types
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::condition::ConditionError;
use crate::filter::FilterError;
use crate::observer::ObserverError;
use crate::schema::SchemaError;
use crate::store::StoreError;
use crate::validation::ValidationError;

/// Error surfaced by every record operation, with a status code and a
/// client-safe JSON body
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Field '{field}' is not writable")]
    FieldNotWritable { field: String },

    #[error("Record {id} is locked by a pending approval")]
    RecordLocked { id: Uuid },

    #[error("{field} references a record that does not exist: {id}")]
    ReferenceNotFound { field: String, id: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::BadRequest(_) => 400,
            EngineError::ReferenceNotFound { .. } => 400,
            EngineError::PermissionDenied(_) => 403,
            EngineError::FieldNotWritable { .. } => 403,
            EngineError::NotFound(_) => 404,
            EngineError::RecordLocked { .. } => 409,
            EngineError::Internal(_) => 500,
            EngineError::DeadlineExceeded => 504,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Validation(e) => e.kind.code(),
            EngineError::BadRequest(_) => "BAD_REQUEST",
            EngineError::PermissionDenied(_) => "PERMISSION_DENIED",
            EngineError::FieldNotWritable { .. } => "FIELD_NOT_WRITABLE",
            EngineError::RecordLocked { .. } => "RECORD_LOCKED",
            EngineError::ReferenceNotFound { .. } => "REFERENCE_NOT_FOUND",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            EngineError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "message": self.to_string(),
            "code": self.error_code(),
        });
        match self {
            EngineError::Validation(e) => {
                body["field"] = json!(e.field);
                let mut field_errors = serde_json::Map::new();
                field_errors.insert(e.field.clone(), Value::String(e.to_string()));
                body["field_errors"] = Value::Object(field_errors);
            }
            EngineError::FieldNotWritable { field } | EngineError::ReferenceNotFound { field, .. } => {
                body["field"] = json!(field);
            }
            _ => {}
        }
        body
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        EngineError::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        EngineError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into())
    }
}

impl From<FilterError> for EngineError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::InvalidValue { source, .. } => EngineError::Validation(source),
            other => EngineError::BadRequest(other.to_string()),
        }
    }
}

impl From<ConditionError> for EngineError {
    fn from(err: ConditionError) -> Self {
        // Unresolvable permission conditions fail closed
        warn!("Permission condition rejected: {}", err);
        EngineError::PermissionDenied("Access condition could not be evaluated".to_string())
    }
}

impl From<SchemaError> for EngineError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::NotFound(name) => EngineError::NotFound(format!("Entity '{}' not found", name)),
            other => {
                error!("Schema registry error: {}", other);
                EngineError::Internal("Schema registry failure".to_string())
            }
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        error!("Store error: {:?}", err);
        EngineError::Internal("Database operation failed".to_string())
    }
}

impl From<ObserverError> for EngineError {
    fn from(err: ObserverError) -> Self {
        error!("Observer error: {}", err);
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};

    #[test]
    fn test_validation_body_carries_field() {
        let field = FieldDefinition::new("email", FieldType::Email).label("Email");
        let err = EngineError::from(ValidationError::missing(&field));
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "MISSING_FIELD");

        let body = err.to_json();
        assert_eq!(body["message"], "Email is required");
        assert_eq!(body["field"], "email");
    }

    #[test]
    fn test_store_errors_are_generic() {
        let err = EngineError::from(StoreError::Corrupt("secret detail".into()));
        assert_eq!(err.status_code(), 500);
        assert!(!err.to_json()["message"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn test_lock_and_deadline_codes() {
        let err = EngineError::RecordLocked { id: Uuid::nil() };
        assert_eq!(err.status_code(), 409);
        assert_eq!(EngineError::DeadlineExceeded.error_code(), "DEADLINE_EXCEEDED");
    }
}
