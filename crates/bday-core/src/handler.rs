//! Per-event-type behavior (design §9): today only `BIRTHDAY` exists, but a
//! new event type is added by implementing `EventHandler` and registering it
//! here — the claim/dispatch/state-machine core never matches on
//! `EventType` directly.

use bday_schemas::{EventType, User};
use chrono::NaiveDate;
use std::collections::HashMap;

pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> EventType;

    /// The next local calendar date (strictly after `reference_local_date`)
    /// this event should fire for `user`.
    fn next_occurrence(&self, user: &User, reference_local_date: NaiveDate) -> NaiveDate;

    /// The human-readable message placed in the delivery payload.
    fn format_message(&self, user: &User) -> String;
}

/// The only handler today (spec §1 non-goal: no other event types are
/// specified, but the registry leaves room).
pub struct BirthdayHandler;

impl EventHandler for BirthdayHandler {
    fn event_type(&self) -> EventType {
        EventType::Birthday
    }

    fn next_occurrence(&self, user: &User, reference_local_date: NaiveDate) -> NaiveDate {
        bday_time::next_occurrence(
            user.date_of_birth.month(),
            user.date_of_birth.day(),
            reference_local_date,
        )
    }

    fn format_message(&self, user: &User) -> String {
        format!("Happy birthday, {}!", user.first_name)
    }
}

use chrono::Datelike;

pub struct HandlerRegistry {
    handlers: HashMap<EventType, Box<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(handler.event_type(), handler);
        self
    }

    pub fn get(&self, event_type: EventType) -> Option<&dyn EventHandler> {
        self.handlers.get(&event_type).map(|h| h.as_ref())
    }

    /// The registry shipped by default: just `BirthdayHandler`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(BirthdayHandler));
        reg
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
