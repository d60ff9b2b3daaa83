use async_trait::async_trait;
use std::collections::HashMap;

use super::error::ObserverError;
use super::traits::ApprovalInitializer;
use crate::record::{ApprovalState, ApprovalStep, EntityRecord};
use crate::schema::EntityDefinition;
use crate::types::RequestContext;

/// No entity has an approval workflow
#[derive(Debug, Default, Clone)]
pub struct NoApproval;

#[async_trait]
impl ApprovalInitializer for NoApproval {
    async fn initialize_approval(
        &self,
        _ctx: &RequestContext,
        _entity: &EntityDefinition,
        _record: &EntityRecord,
    ) -> Result<Option<ApprovalState>, ObserverError> {
        Ok(None)
    }
}

/// Submits every new record of the configured entities to a workflow
#[derive(Debug, Default, Clone)]
pub struct EntityWorkflows {
    workflows: HashMap<String, String>,
}

impl EntityWorkflows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(mut self, entity: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        self.workflows.insert(entity.into(), workflow_id.into());
        self
    }
}

#[async_trait]
impl ApprovalInitializer for EntityWorkflows {
    async fn initialize_approval(
        &self,
        ctx: &RequestContext,
        entity: &EntityDefinition,
        record: &EntityRecord,
    ) -> Result<Option<ApprovalState>, ObserverError> {
        let Some(workflow_id) = self.workflows.get(&entity.name) else {
            return Ok(None);
        };
        let mut state = ApprovalState::pending(workflow_id.clone());
        state.history.push(ApprovalStep {
            step: 0,
            action: "submitted".to_string(),
            actor: ctx.user_id.clone(),
            comment: None,
            at: record.created_at,
        });
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ApprovalStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_configured_entities_start_pending() {
        let workflows = EntityWorkflows::new().workflow("expenses", "wf-expense");
        let ctx = RequestContext::new("t1", "u1");
        let record = EntityRecord::new("t1", "expenses", "u1", Utc::now(), BTreeMap::new());

        let state = workflows
            .initialize_approval(&ctx, &EntityDefinition::new("expenses"), &record)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, ApprovalStatus::Pending);
        assert_eq!(state.history[0].actor, "u1");

        let none = workflows
            .initialize_approval(&ctx, &EntityDefinition::new("contacts"), &record)
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
