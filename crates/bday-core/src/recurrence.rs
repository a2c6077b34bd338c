//! Recurrence generator (design §4.7): on a completed event, seeds next
//! year's PENDING event using a deterministic idempotency key so that a
//! retried completion can never double-seed.

use crate::handler::HandlerRegistry;
use crate::store::{NewEvent, Store, StoreError};
use bday_schemas::{DeliveryPayload, Event};
use bday_time::TimeError;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecurrenceError {
    #[error("no handler registered for event type {0}")]
    NoHandler(String),
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub enum RecurrenceOutcome {
    /// A fresh PENDING event was inserted for next year.
    Inserted(Event),
    /// Another worker already seeded this (user, year); idempotent no-op.
    AlreadySeeded,
    /// The user was deleted mid-execution; nothing to seed (design §4.7 step 1).
    UserGone,
}

/// Deterministic idempotency key: `event-<hex16(sha256(user_id || target_utc_iso))>`.
pub fn derive_idempotency_key(user_id: Uuid, target_utc: chrono::DateTime<chrono::Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(target_utc.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    format!("event-{}", hex::encode(&digest[..8]))
}

/// Runs the recurrence generator for a just-completed `event`, using the
/// user record read fresh from `store` (so a concurrent `UserBirthdayChanged`
/// is picked up automatically — design §8 scenario 6).
pub async fn generate_recurrence(
    store: &dyn Store,
    handlers: &HandlerRegistry,
    event: &Event,
    default_webhook_url: &str,
) -> Result<RecurrenceOutcome, RecurrenceError> {
    let Some(user) = store.find_user(event.user_id).await? else {
        tracing::info!(user_id = %event.user_id, "user deleted mid-execution; skipping recurrence");
        return Ok(RecurrenceOutcome::UserGone);
    };

    let handler = handlers
        .get(event.event_type)
        .ok_or_else(|| RecurrenceError::NoHandler(event.event_type.to_string()))?;

    let next_local_date = handler.next_occurrence(&user, event.target_local_date);
    let target_local_time = bday_time::delivery_time();
    let target_utc = bday_time::local_to_utc(next_local_date, target_local_time, &user.timezone)?;
    let idempotency_key = derive_idempotency_key(user.id, target_utc);

    let payload = DeliveryPayload {
        message: handler.format_message(&user),
        webhook_url: Some(default_webhook_url.to_string()),
    };
    let delivery_payload =
        serde_json::to_value(&payload).expect("DeliveryPayload always serializes");

    let new_event = NewEvent {
        user_id: user.id,
        event_type: event.event_type,
        target_utc,
        target_local_date: next_local_date,
        target_local_time,
        target_zone: user.timezone.clone(),
        idempotency_key,
        delivery_payload,
    };

    match store.insert_event(new_event).await {
        Ok(ev) => Ok(RecurrenceOutcome::Inserted(ev)),
        Err(StoreError::DuplicateIdempotencyKey(_)) => Ok(RecurrenceOutcome::AlreadySeeded),
        Err(other) => Err(other.into()),
    }
}
