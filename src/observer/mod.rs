// Side effects of record writes: audit trail, approval workflow entry
// and automation/webhook notifications

pub mod approval;
pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod traits;

pub use approval::{EntityWorkflows, NoApproval};
pub use audit::TracingAuditSink;
pub use dispatcher::{DispatchOutcome, DropReason, NotificationDispatcher};
pub use error::ObserverError;
pub use traits::{ApprovalInitializer, AuditSink, Notification, NotificationEvent, Notifier};
