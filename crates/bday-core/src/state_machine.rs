//! Pure state machine over `Event` (design §4.3). No I/O: every transition
//! takes an `Event` and returns the next `Event` value with `version`
//! incremented, or an error. Persisting the result is the caller's job
//! (`Store::update_event`), which enforces the version as an optimistic
//! lock.

use bday_schemas::{Event, EventStatus};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: EventStatus,
    pub to: EventStatus,
}

/// The triggers that can move an event through its lifecycle (design §4.3
/// table, one variant per row).
pub enum Trigger {
    /// Claim engine: PENDING -> PROCESSING.
    Claim,
    /// Successful delivery: PROCESSING -> COMPLETED.
    DeliverySucceeded { executed_at: DateTime<Utc> },
    /// Permanent delivery error: PROCESSING -> FAILED.
    DeliveryFailedPermanently { reason: String },
    /// Reschedule: PENDING -> PENDING with a new target.
    Reschedule {
        target_utc: DateTime<Utc>,
        target_local_date: NaiveDate,
        target_local_time: NaiveTime,
        target_zone: String,
    },
}

/// Applies `trigger` to `event`, returning the event as it should be after
/// the transition (version bumped by exactly 1). Terminal states
/// (COMPLETED, FAILED) never transition again; any such attempt, and any
/// transition not in the table below, is rejected.
pub fn apply(event: &Event, trigger: Trigger) -> Result<Event, InvalidTransition> {
    let mut next = event.clone();

    let to = match (&trigger, event.status) {
        (Trigger::Claim, EventStatus::Pending) => EventStatus::Processing,
        (Trigger::DeliverySucceeded { .. }, EventStatus::Processing) => EventStatus::Completed,
        (Trigger::DeliveryFailedPermanently { .. }, EventStatus::Processing) => {
            EventStatus::Failed
        }
        (Trigger::Reschedule { .. }, EventStatus::Pending) => EventStatus::Pending,
        (_, from) => {
            let to = trigger_target_label(&trigger);
            return Err(InvalidTransition { from, to });
        }
    };

    match trigger {
        Trigger::Claim => {}
        Trigger::DeliverySucceeded { executed_at } => {
            next.executed_at = Some(executed_at);
        }
        Trigger::DeliveryFailedPermanently { reason } => {
            next.failure_reason = Some(reason);
            next.retry_count += 1;
        }
        Trigger::Reschedule {
            target_utc,
            target_local_date,
            target_local_time,
            target_zone,
        } => {
            next.target_utc = target_utc;
            next.target_local_date = target_local_date;
            next.target_local_time = target_local_time;
            next.target_zone = target_zone;
        }
    }

    next.status = to;
    next.version += 1;
    Ok(next)
}

fn trigger_target_label(trigger: &Trigger) -> EventStatus {
    match trigger {
        Trigger::Claim => EventStatus::Processing,
        Trigger::DeliverySucceeded { .. } => EventStatus::Completed,
        Trigger::DeliveryFailedPermanently { .. } => EventStatus::Failed,
        Trigger::Reschedule { .. } => EventStatus::Pending,
    }
}
