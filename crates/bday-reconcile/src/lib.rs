//! Reschedule / cancel handlers (design §4.8): reacts to domain events from
//! the user context by mutating PENDING rows in place. Grounded on the
//! separation between deciding what drifted and applying that decision —
//! each handler here only ever touches PENDING rows, and a lock conflict on
//! one row is skipped and logged rather than failing the whole batch.

use bday_core::{
    apply_transition, derive_idempotency_key, Clock, HandlerRegistry, NewEvent, Store,
    StoreError, Trigger,
};
use bday_schemas::{DeliveryPayload, Event, EventStatus, EventType, User};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a batch reschedule: never fails for an individual row conflict
/// (design §4.8 — "never fails the whole batch for one conflict").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleSummary {
    pub rescheduled: usize,
    pub skipped: usize,
    pub skipped_ids: Vec<Uuid>,
}

impl RescheduleSummary {
    fn record_skip(&mut self, id: Uuid) {
        self.skipped += 1;
        self.skipped_ids.push(id);
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no handler registered for event type {0}")]
    NoHandler(String),
    #[error(transparent)]
    Time(#[from] bday_time::TimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of seeding a new user's first event: mirrors
/// `bday_core::RecurrenceOutcome`'s idempotent-insert shape.
#[derive(Debug, Clone)]
pub enum NewUserOutcome {
    Seeded(Event),
    AlreadySeeded,
}

pub struct ReconcileEngine {
    store: Arc<dyn Store>,
    handlers: Arc<HandlerRegistry>,
    /// Reschedule and new-user reference dates are computed against this
    /// clock's "now" rather than any date already stored on the event, so a
    /// reschedule always lands on the next occurrence relative to the
    /// present instant.
    clock: Arc<dyn Clock>,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn Store>, handlers: Arc<HandlerRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            handlers,
            clock,
        }
    }

    /// Every PENDING `BIRTHDAY` event of `user_id` is recomputed against
    /// `new_dob`; non-`BIRTHDAY` events are out of scope entirely, and a
    /// non-PENDING `BIRTHDAY` event (e.g. one a worker currently has in
    /// PROCESSING) is left untouched but still counted as skipped.
    pub async fn user_birthday_changed(
        &self,
        user_id: Uuid,
        new_dob: NaiveDate,
        timezone: &str,
    ) -> Result<RescheduleSummary, StoreError> {
        let events = self.store.find_events_by_user(user_id).await?;
        let mut summary = RescheduleSummary::default();

        for event in events {
            if event.event_type != EventType::Birthday {
                continue;
            }
            if event.status != EventStatus::Pending {
                summary.record_skip(event.id);
                continue;
            }

            let handler = match self.handlers.get(event.event_type) {
                Some(h) => h,
                None => continue,
            };
            let reference = match bday_time::utc_to_local_date(self.clock.now(), timezone) {
                Ok(d) => d,
                Err(err) => {
                    warn!(event_id = %event.id, %err, "reschedule reference could not be resolved; skipping");
                    summary.record_skip(event.id);
                    continue;
                }
            };
            // `next_occurrence` ignores DOB year, so handing it a fabricated
            // `User` with only `date_of_birth`/`timezone` populated is safe.
            let probe = probe_user(new_dob, timezone);
            let next_local_date = handler.next_occurrence(&probe, reference);

            self.apply_reschedule(event, next_local_date, timezone, &mut summary)
                .await?;
        }

        info!(
            %user_id,
            rescheduled = summary.rescheduled,
            skipped = summary.skipped,
            "birthday-change reschedule complete"
        );
        Ok(summary)
    }

    /// Every PENDING event of any type has its `target_local` kept and
    /// `target_utc` recomputed under `new_timezone`.
    pub async fn user_timezone_changed(
        &self,
        user_id: Uuid,
        new_timezone: &str,
    ) -> Result<RescheduleSummary, StoreError> {
        let events = self.store.find_events_by_user(user_id).await?;
        let mut summary = RescheduleSummary::default();

        for event in events {
            if event.status != EventStatus::Pending {
                continue;
            }
            let target_local_date = event.target_local_date;
            self.apply_reschedule(event, target_local_date, new_timezone, &mut summary)
                .await?;
        }

        info!(
            %user_id,
            rescheduled = summary.rescheduled,
            skipped = summary.skipped,
            "timezone-change reschedule complete"
        );
        Ok(summary)
    }

    /// Cascades the delete to every event row, regardless of status. A
    /// PROCESSING event's in-flight worker finds no row on completion and
    /// aborts silently (design §4.8) — nothing here needs to coordinate
    /// with it directly.
    pub async fn user_deleted(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.store.delete_user(user_id).await?;
        info!(%user_id, "user deleted; events cascaded");
        Ok(())
    }

    /// New-user bootstrap (design §3 lifecycle, §4.8): seeds the first
    /// PENDING `BIRTHDAY` event for a just-created user, computed against
    /// the clock's current local date in the user's zone. Uses the same
    /// deterministic idempotency key the recurrence generator uses, so a
    /// retried `UserCreated` delivery can never double-seed.
    pub async fn user_created(&self, user: User) -> Result<NewUserOutcome, ReconcileError> {
        let user = self.store.upsert_user(user).await?;

        let handler = self
            .handlers
            .get(EventType::Birthday)
            .ok_or_else(|| ReconcileError::NoHandler(EventType::Birthday.to_string()))?;

        let reference = bday_time::utc_to_local_date(self.clock.now(), &user.timezone)?;
        let next_local_date = handler.next_occurrence(&user, reference);
        let target_local_time = bday_time::delivery_time();
        let target_utc = bday_time::local_to_utc(next_local_date, target_local_time, &user.timezone)?;
        let idempotency_key = derive_idempotency_key(user.id, target_utc);

        let payload = DeliveryPayload {
            message: handler.format_message(&user),
            webhook_url: None,
        };
        let delivery_payload =
            serde_json::to_value(&payload).expect("DeliveryPayload always serializes");

        let new_event = NewEvent {
            user_id: user.id,
            event_type: EventType::Birthday,
            target_utc,
            target_local_date: next_local_date,
            target_local_time,
            target_zone: user.timezone.clone(),
            idempotency_key,
            delivery_payload,
        };

        match self.store.insert_event(new_event).await {
            Ok(ev) => Ok(NewUserOutcome::Seeded(ev)),
            Err(StoreError::DuplicateIdempotencyKey(_)) => Ok(NewUserOutcome::AlreadySeeded),
            Err(other) => Err(other.into()),
        }
    }

    async fn apply_reschedule(
        &self,
        event: Event,
        next_local_date: NaiveDate,
        timezone: &str,
        summary: &mut RescheduleSummary,
    ) -> Result<(), StoreError> {
        let target_local_time = bday_time::delivery_time();
        let target_utc = match bday_time::local_to_utc(next_local_date, target_local_time, timezone)
        {
            Ok(t) => t,
            Err(err) => {
                warn!(event_id = %event.id, %err, "reschedule target could not be resolved; skipping");
                summary.record_skip(event.id);
                return Ok(());
            }
        };

        let prev_version = event.version;
        let event_id = event.id;
        let rescheduled = apply_transition(
            &event,
            Trigger::Reschedule {
                target_utc,
                target_local_date: next_local_date,
                target_local_time,
                target_zone: timezone.to_string(),
            },
        )
        .expect("PENDING -> PENDING reschedule is always a legal transition");

        match self.store.update_event(rescheduled, prev_version).await {
            Ok(_) => {
                summary.rescheduled += 1;
                Ok(())
            }
            Err(StoreError::OptimisticLockConflict { .. }) => {
                warn!(event_id = %event_id, "reschedule lost a version race; skipping");
                summary.record_skip(event_id);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

fn probe_user(date_of_birth: NaiveDate, timezone: &str) -> bday_schemas::User {
    bday_schemas::User {
        id: Uuid::nil(),
        first_name: String::new(),
        last_name: String::new(),
        date_of_birth,
        timezone: timezone.to_string(),
        created_at: chrono::DateTime::<chrono::Utc>::MIN_UTC,
        updated_at: chrono::DateTime::<chrono::Utc>::MIN_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bday_core::NewEvent;
    use bday_schemas::{EventType, User};
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        events: Mutex<HashMap<Uuid, Event>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
            Ok(user)
        }
        async fn find_user(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
            self.events.lock().unwrap().retain(|_, e| e.user_id != id);
            Ok(())
        }
        async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StoreError> {
            let mut events = self.events.lock().unwrap();
            if events
                .values()
                .any(|e| e.idempotency_key == new_event.idempotency_key)
            {
                return Err(StoreError::DuplicateIdempotencyKey(new_event.idempotency_key));
            }
            let now = Utc::now();
            let event = Event {
                id: Uuid::new_v4(),
                user_id: new_event.user_id,
                event_type: new_event.event_type,
                status: EventStatus::Pending,
                target_utc: new_event.target_utc,
                target_local_date: new_event.target_local_date,
                target_local_time: new_event.target_local_time,
                target_zone: new_event.target_zone,
                executed_at: None,
                failure_reason: None,
                retry_count: 0,
                version: 0,
                idempotency_key: new_event.idempotency_key,
                delivery_payload: new_event.delivery_payload,
                created_at: now,
                updated_at: now,
            };
            events.insert(event.id, event.clone());
            Ok(event)
        }
        async fn find_event_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
            Ok(self.events.lock().unwrap().get(&id).cloned())
        }
        async fn find_events_by_user(&self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect())
        }
        async fn update_event(
            &self,
            event: Event,
            expected_prev_version: i64,
        ) -> Result<Event, StoreError> {
            let mut events = self.events.lock().unwrap();
            let current = events
                .get(&event.id)
                .ok_or(StoreError::EventNotFound(event.id))?;
            if current.version != expected_prev_version {
                return Err(StoreError::OptimisticLockConflict {
                    id: event.id,
                    expected: expected_prev_version,
                });
            }
            events.insert(event.id, event.clone());
            Ok(event)
        }
        async fn claim_due(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
            _stale_processing_after: chrono::Duration,
        ) -> Result<Vec<Event>, StoreError> {
            unimplemented!()
        }
        async fn find_missed(&self, _now: DateTime<Utc>, _limit: i64) -> Result<Vec<Event>, StoreError> {
            unimplemented!()
        }
    }

    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn pending_event(user_id: Uuid, event_type: EventType, target: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            status: EventStatus::Pending,
            target_utc: target,
            target_local_date: target.date_naive(),
            target_local_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            target_zone: "UTC".to_string(),
            executed_at: None,
            failure_reason: None,
            retry_count: 0,
            version: 1,
            idempotency_key: format!("k-{}", Uuid::new_v4()),
            delivery_payload: json!({"message": "hi"}),
            created_at: target,
            updated_at: target,
        }
    }

    fn engine(store: Arc<dyn Store>) -> ReconcileEngine {
        ReconcileEngine::new(
            store,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(FixedClock(Utc::now())),
        )
    }

    #[tokio::test]
    async fn birthday_change_reschedules_to_this_years_date_when_still_upcoming() {
        let store = Arc::new(FakeStore::default());
        let user_id = Uuid::new_v4();
        // The old DOB's event happened to be scheduled against 2027; that
        // year has no bearing on the reschedule target, which must be
        // computed from "now", not from the stale row's own year.
        let target = Utc.with_ymd_and_hms(2027, 3, 15, 13, 0, 0).unwrap();
        let birthday_event = pending_event(user_id, EventType::Birthday, target);
        store
            .events
            .lock()
            .unwrap()
            .insert(birthday_event.id, birthday_event.clone());

        // "Now" is 2026-07-28; the new DOB's month/day (Sept 10) is still
        // ahead of "now" this same year, so the correct target is this
        // year, not next year.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let eng = ReconcileEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(FixedClock(now)),
        );
        let summary = eng
            .user_birthday_changed(
                user_id,
                NaiveDate::from_ymd_opt(1990, 9, 10).unwrap(),
                "UTC",
            )
            .await
            .unwrap();

        assert_eq!(summary.rescheduled, 1);
        assert_eq!(summary.skipped, 0);

        let updated = store
            .find_event_by_id(birthday_event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            updated.target_local_date,
            NaiveDate::from_ymd_opt(2026, 9, 10).unwrap()
        );
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn birthday_change_rolls_to_next_year_when_new_date_already_passed() {
        let store = Arc::new(FakeStore::default());
        let user_id = Uuid::new_v4();
        let target = Utc.with_ymd_and_hms(2027, 3, 15, 13, 0, 0).unwrap();
        let birthday_event = pending_event(user_id, EventType::Birthday, target);
        store
            .events
            .lock()
            .unwrap()
            .insert(birthday_event.id, birthday_event.clone());

        // "Now" is 2026-07-28; the new DOB's month/day (June 1) already
        // passed this year, so the reschedule target must roll to next year.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let eng = ReconcileEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(FixedClock(now)),
        );
        let summary = eng
            .user_birthday_changed(
                user_id,
                NaiveDate::from_ymd_opt(1990, 6, 1).unwrap(),
                "UTC",
            )
            .await
            .unwrap();

        assert_eq!(summary.rescheduled, 1);
        assert_eq!(summary.skipped, 0);

        let updated = store
            .find_event_by_id(birthday_event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            updated.target_local_date,
            NaiveDate::from_ymd_opt(2027, 6, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn non_pending_events_are_left_untouched_but_counted_as_skipped() {
        let store = Arc::new(FakeStore::default());
        let user_id = Uuid::new_v4();
        let target = Utc.with_ymd_and_hms(2027, 3, 15, 13, 0, 0).unwrap();
        let mut processing = pending_event(user_id, EventType::Birthday, target);
        processing.status = EventStatus::Processing;
        store
            .events
            .lock()
            .unwrap()
            .insert(processing.id, processing.clone());

        let eng = engine(Arc::clone(&store));
        let summary = eng
            .user_birthday_changed(user_id, NaiveDate::from_ymd_opt(1990, 6, 1).unwrap(), "UTC")
            .await
            .unwrap();

        assert_eq!(summary.rescheduled, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_ids, vec![processing.id]);
        let unchanged = store.find_event_by_id(processing.id).await.unwrap().unwrap();
        assert_eq!(unchanged.version, processing.version, "row itself is never mutated");
    }

    /// Returns a stale copy of whatever event it holds from
    /// `find_events_by_user` while the real store advances underneath it,
    /// reproducing the "another process won the race" window design §4.8
    /// requires the batch to survive.
    #[derive(Default)]
    struct RacyStore {
        inner: FakeStore,
        stale_read: Mutex<Option<Event>>,
    }

    #[async_trait]
    impl Store for RacyStore {
        async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
            self.inner.upsert_user(user).await
        }
        async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.inner.find_user(id).await
        }
        async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.delete_user(id).await
        }
        async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StoreError> {
            self.inner.insert_event(new_event).await
        }
        async fn find_event_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
            self.inner.find_event_by_id(id).await
        }
        async fn find_events_by_user(&self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
            // Hand back the pre-race snapshot, as if another writer bumped
            // the row's version after this read but before our write.
            Ok(self.stale_read.lock().unwrap().iter().cloned().collect())
        }
        async fn update_event(
            &self,
            event: Event,
            expected_prev_version: i64,
        ) -> Result<Event, StoreError> {
            self.inner.update_event(event, expected_prev_version).await
        }
        async fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: i64,
            stale_processing_after: chrono::Duration,
        ) -> Result<Vec<Event>, StoreError> {
            self.inner.claim_due(now, limit, stale_processing_after).await
        }
        async fn find_missed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError> {
            self.inner.find_missed(now, limit).await
        }
    }

    #[tokio::test]
    async fn lock_conflict_on_one_row_is_skipped_not_fatal() {
        let user_id = Uuid::new_v4();
        let target = Utc.with_ymd_and_hms(2027, 3, 15, 13, 0, 0).unwrap();
        let event = pending_event(user_id, EventType::Birthday, target);

        let store = Arc::new(RacyStore::default());
        // The "real" current row is at version 2 (another writer already
        // touched it); the batch's own read is stuck at version 1.
        let mut advanced = event.clone();
        advanced.version = 2;
        store.inner.events.lock().unwrap().insert(event.id, advanced);
        *store.stale_read.lock().unwrap() = Some(event.clone());

        let eng = engine(Arc::clone(&store) as Arc<dyn Store>);
        let summary = eng
            .user_birthday_changed(user_id, NaiveDate::from_ymd_opt(1990, 6, 1).unwrap(), "UTC")
            .await
            .unwrap();

        assert_eq!(summary.rescheduled, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_ids, vec![event.id]);

        let stored = store.inner.events.lock().unwrap().get(&event.id).unwrap().clone();
        assert_eq!(stored.version, 2, "the conflicting row was never overwritten");
    }

    #[tokio::test]
    async fn user_deleted_cascades_event_removal() {
        let store = Arc::new(FakeStore::default());
        let user_id = Uuid::new_v4();
        let target = Utc.with_ymd_and_hms(2027, 3, 15, 13, 0, 0).unwrap();
        let event = pending_event(user_id, EventType::Birthday, target);
        store.events.lock().unwrap().insert(event.id, event.clone());

        let eng = engine(Arc::clone(&store));
        eng.user_deleted(user_id).await.unwrap();

        assert!(store.find_event_by_id(event.id).await.unwrap().is_none());
    }

    fn new_user(date_of_birth: NaiveDate) -> User {
        User {
            id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            date_of_birth,
            timezone: "UTC".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn user_created_seeds_the_first_pending_event() {
        let store = Arc::new(FakeStore::default());
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let eng = ReconcileEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(FixedClock(now)),
        );

        let user = new_user(NaiveDate::from_ymd_opt(1990, 9, 10).unwrap());
        let outcome = eng.user_created(user.clone()).await.unwrap();

        let seeded = match outcome {
            NewUserOutcome::Seeded(event) => event,
            NewUserOutcome::AlreadySeeded => panic!("expected a fresh insert"),
        };
        assert_eq!(seeded.user_id, user.id);
        assert_eq!(seeded.status, EventStatus::Pending);
        assert_eq!(
            seeded.target_local_date,
            NaiveDate::from_ymd_opt(2026, 9, 10).unwrap()
        );
    }

    #[tokio::test]
    async fn user_created_is_idempotent_under_retry() {
        let store = Arc::new(FakeStore::default());
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let eng = ReconcileEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(FixedClock(now)),
        );

        let user = new_user(NaiveDate::from_ymd_opt(1990, 9, 10).unwrap());
        eng.user_created(user.clone()).await.unwrap();
        let second = eng.user_created(user).await.unwrap();

        assert!(matches!(second, NewUserOutcome::AlreadySeeded));
        assert_eq!(store.events.lock().unwrap().len(), 1);
    }
}
