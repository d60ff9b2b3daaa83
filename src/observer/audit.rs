use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::error::ObserverError;
use super::traits::AuditSink;
use crate::record::FieldChange;
use crate::types::{Action, RequestContext};

/// Writes change logs to the `audit` tracing target.
/// Silent unless `SECURITY_ENABLE_AUDIT_LOGGING` is on.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_change(
        &self,
        ctx: &RequestContext,
        action: Action,
        entity: &str,
        record_id: Uuid,
        changes: &[FieldChange],
    ) -> Result<(), ObserverError> {
        if !crate::config::CONFIG.security.enable_audit_logging {
            return Ok(());
        }
        let changes = serde_json::to_string(changes).map_err(|e| ObserverError::AuditError(e.to_string()))?;
        info!(
            target: "audit",
            tenant = %ctx.tenant_id,
            user = %ctx.user_id,
            %action,
            entity,
            %record_id,
            changes = %changes,
            "Record changed"
        );
        Ok(())
    }
}
