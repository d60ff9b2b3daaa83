use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Unsupported operator '{operator}' for field '{field}'")]
    UnsupportedOperator { field: String, operator: String },

    #[error("Invalid filter value for {label}: {source}")]
    InvalidValue {
        label: String,
        #[source]
        source: ValidationError,
    },

    #[error("Invalid range for {label}: expected two dates or two numbers")]
    InvalidRange { label: String },

    #[error("A filter value is required for {label}")]
    MissingValue { label: String },

    #[error("Invalid sort specification: {0}")]
    InvalidSort(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
