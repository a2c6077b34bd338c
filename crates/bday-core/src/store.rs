//! The event/user store port (design §4.2, §4.4). Concrete adapters live in
//! `bday-db` (Postgres, production) and `bday-testkit` (in-memory, tests).

use async_trait::async_trait;
use bday_schemas::{Event, EventType, User};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("idempotency key already exists: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("optimistic lock conflict on event {id} (expected version {expected})")]
    OptimisticLockConflict { id: Uuid, expected: i64 },

    #[error("state transition from {from} to {to} is not permitted")]
    InvalidTransition { from: String, to: String },

    #[error("no such event: {0}")]
    EventNotFound(Uuid),

    #[error("no such user: {0}")]
    UserNotFound(Uuid),

    #[error("store infrastructure error: {0}")]
    Infrastructure(String),
}

/// The fields needed to insert a brand-new PENDING event (recurrence
/// generator output, or the new-user handler's first event).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub user_id: Uuid,
    pub event_type: EventType,
    pub target_utc: DateTime<Utc>,
    pub target_local_date: NaiveDate,
    pub target_local_time: NaiveTime,
    pub target_zone: String,
    pub idempotency_key: String,
    pub delivery_payload: Value,
}

/// Persistent store for users and their scheduled events (design §3, §4.2).
///
/// All mutating operations are idempotent under retry at the adapter
/// boundary: the caller passes the expected version and the store enforces
/// it via `update_event`; inserts are made safe to retry by the unique
/// `idempotency_key` index.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_user(&self, user: User) -> Result<User, StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Cascades to delete all of the user's events (spec §4.8 UserDeleted).
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StoreError>;
    async fn find_event_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError>;
    async fn find_events_by_user(&self, user_id: Uuid) -> Result<Vec<Event>, StoreError>;

    /// Conditional update: succeeds only if `event.id`'s current stored
    /// version equals `expected_prev_version`, in which case the new version
    /// is `expected_prev_version + 1`. Fails with `OptimisticLockConflict`
    /// otherwise.
    async fn update_event(
        &self,
        event: Event,
        expected_prev_version: i64,
    ) -> Result<Event, StoreError>;

    /// The claim engine's atomic primitive (design §4.4): selects PENDING
    /// rows due at or before `now`, plus any PROCESSING rows stuck past
    /// `stale_processing_after` (the in-process queue's reclamation path,
    /// §4.5), transitions them to PROCESSING, and returns them — all inside
    /// one serial transaction using row-level locks that skip rows already
    /// locked by a concurrent claimer.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_processing_after: chrono::Duration,
    ) -> Result<Vec<Event>, StoreError>;

    /// PENDING rows with `target_utc < now`, ascending — used by the
    /// recovery scanner, though it shares the exact same code path as the
    /// normal tick via `claim_due` (design §4.9).
    async fn find_missed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError>;
}
