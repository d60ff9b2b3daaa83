use thiserror::Error;

/// Failures of side-effect collaborators (audit sinks and notifiers)
#[derive(Debug, Error, Clone)]
pub enum ObserverError {
    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Notifier '{notifier}' failed: {message}")]
    NotifierError { notifier: String, message: String },
}

impl ObserverError {
    pub fn notifier(notifier: &str, message: impl Into<String>) -> Self {
        ObserverError::NotifierError { notifier: notifier.to_string(), message: message.into() }
    }
}
