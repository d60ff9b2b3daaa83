pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::filter::{Predicate, SortSpec};
use crate::record::{ApprovalState, EntityRecord, RecordChanges, WriteStamp};
use crate::schema::EntityDefinition;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors from persistence backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Duplicate record id: {0}")]
    Duplicate(Uuid),

    #[error("Stored record is unreadable: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// One page request against the store
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Caller filters plus tenant/entity guard
    pub predicate: Predicate,
    /// Permission condition; always ANDed
    pub forced: Predicate,
    pub limit: u32,
    pub offset: u32,
    pub sort: Vec<SortSpec>,
}

impl ListQuery {
    pub fn effective_predicate(&self) -> Predicate {
        self.predicate.clone().and(self.forced.clone())
    }
}

/// Record persistence. Guarded writes apply only when the stored record
/// matches `guard` at write time and return `None` otherwise.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create(&self, entity: &EntityDefinition, record: EntityRecord) -> Result<EntityRecord, StoreError>;

    async fn get(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<Option<EntityRecord>, StoreError>;

    async fn list(&self, entity: &EntityDefinition, query: &ListQuery) -> Result<Vec<EntityRecord>, StoreError>;

    async fn count(&self, entity: &EntityDefinition, predicate: &Predicate) -> Result<u64, StoreError>;

    async fn update(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        changes: &RecordChanges,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError>;

    async fn soft_delete(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError>;

    async fn restore(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        guard: &Predicate,
        stamp: &WriteStamp,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// Replace the approval state; used by the workflow collaborator
    async fn set_approval(
        &self,
        entity: &EntityDefinition,
        id: Uuid,
        state: Option<ApprovalState>,
    ) -> Result<Option<EntityRecord>, StoreError>;
}
