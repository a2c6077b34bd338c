//! The scheduling engine's pure core: ports (`Store`, `Clock`,
//! `WebhookClient`), the `Event` state machine, the per-type handler
//! registry, and the recurrence generator. No adapter (Postgres, HTTP,
//! channels) lives here — see `bday-db`, `bday-webhook`, `bday-worker`.

pub mod clock;
pub mod handler;
pub mod recurrence;
pub mod state_machine;
pub mod store;
pub mod validation;
pub mod webhook;

pub use clock::{Clock, SystemClock};
pub use handler::{BirthdayHandler, EventHandler, HandlerRegistry};
pub use recurrence::{derive_idempotency_key, generate_recurrence, RecurrenceError, RecurrenceOutcome};
pub use state_machine::{apply as apply_transition, InvalidTransition, Trigger};
pub use store::{NewEvent, Store, StoreError};
pub use validation::{validate_delivery_payload, ValidationError};
pub use webhook::{DeliveryError, WebhookClient};
