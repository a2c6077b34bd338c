//! Wire-shape DTOs shared across the scheduler crates: the persisted `User`/`Event`
//! rows and the domain-event envelopes the user context sends us (§6 of the design).
//!
//! This crate is deliberately inert: no I/O, no business rules, just the shapes
//! everyone else agrees on.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A user record as owned by the user context; this core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    /// IANA zone name, e.g. "Europe/London".
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed event-type tag. Only `Birthday` exists today; a new variant is added
/// here and picked up by a new `EventHandler` impl registered alongside it,
/// without touching the claim/dispatch/state-machine core (see `bday-core::handler`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Birthday,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Birthday => "BIRTHDAY",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BIRTHDAY" => Ok(EventType::Birthday),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event lifecycle state. See `bday-core::state_machine` for the transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "PROCESSING" => Ok(EventStatus::Processing),
            "COMPLETED" => Ok(EventStatus::Completed),
            "FAILED" => Ok(EventStatus::Failed),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled event row, exactly the columns of §3's data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: EventType,
    pub status: EventStatus,
    pub target_utc: DateTime<Utc>,
    pub target_local_date: NaiveDate,
    pub target_local_time: NaiveTime,
    pub target_zone: String,
    pub executed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub version: i64,
    pub idempotency_key: String,
    pub delivery_payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fixed schema a worker validates `delivery_payload` against before
/// attempting a webhook call (spec §4.5 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub message: String,
    #[serde(rename = "webhookUrl", skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Inbound domain-event shapes from the user context (§6, bit-exact field names).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum DomainEvent {
    UserCreated {
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "firstName")]
        first_name: String,
        #[serde(rename = "lastName")]
        last_name: String,
        #[serde(rename = "dateOfBirth")]
        date_of_birth: NaiveDate,
        timezone: String,
    },
    UserBirthdayChanged {
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "oldDateOfBirth")]
        old_date_of_birth: NaiveDate,
        #[serde(rename = "newDateOfBirth")]
        new_date_of_birth: NaiveDate,
        timezone: String,
    },
    UserTimezoneChanged {
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "oldTimezone")]
        old_timezone: String,
        #[serde(rename = "newTimezone")]
        new_timezone: String,
        #[serde(rename = "dateOfBirth")]
        date_of_birth: NaiveDate,
    },
    UserDeleted {
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
}
