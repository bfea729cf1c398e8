//! Persistence ports.
//!
//! The recurrence service and the admission controller only talk to these
//! traits; `memory` and `postgres` provide the adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Event, EventFilter, EventUpdate, NewEvent, RecurrencePattern, RecurrenceRule};
use crate::rate_limit::QuotaUsage;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryEventStore, MemoryQuotaStore};
pub use postgres::{PgEventStore, PgQuotaStore, PgStores};

/// Errors raised by store adapters
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Event and recurrence rule persistence
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: NewEvent) -> StoreResult<Event>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Applies `update` to one event, returning the stored result
    async fn update_event(&self, id: Uuid, update: &EventUpdate) -> StoreResult<Event>;

    /// Applies `update` to every event matching `filter`, returning how many changed
    async fn update_events(&self, filter: EventFilter, update: &EventUpdate) -> StoreResult<u64>;

    /// Deletes every event matching `filter`, returning how many were removed
    async fn delete_events(&self, filter: EventFilter) -> StoreResult<u64>;

    /// Events matching `filter`, ordered by date
    async fn query_events(&self, filter: EventFilter) -> StoreResult<Vec<Event>>;

    async fn create_rule(&self, pattern: RecurrencePattern) -> StoreResult<RecurrenceRule>;

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<RecurrenceRule>>;

    /// Replaces a rule's pattern
    async fn update_rule(&self, id: Uuid, pattern: RecurrencePattern)
        -> StoreResult<RecurrenceRule>;
}

/// Durable quota counters, keyed by provider
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load_snapshot(&self) -> StoreResult<HashMap<String, QuotaUsage>>;

    async fn save_snapshot(&self, snapshot: &HashMap<String, QuotaUsage>) -> StoreResult<()>;
}
