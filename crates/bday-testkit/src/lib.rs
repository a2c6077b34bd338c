//! In-memory fakes of the scheduler's ports, for deterministic tests across
//! the workspace without a Postgres instance or real HTTP. Grounded on this
//! workspace's own recovery fakes: a minimal struct behind a lock, enforcing
//! just enough of the contract to exercise the scenarios in §8 end to end.

use async_trait::async_trait;
use bday_core::{Clock, DeliveryError, NewEvent, Store, StoreError, WebhookClient};
use bday_schemas::{Event, EventStatus, User};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory mirror of `bday-db::PgStore`'s claim query: the same
/// predicate and ordering, enforced by a single mutex instead of
/// `FOR UPDATE SKIP LOCKED`. Good enough to prove "no row is claimed
/// twice" under concurrent task interleavings within one process.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, Event>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test setup helper: insert a user without going through `upsert_user`.
    pub fn seed_user(&self, user: User) {
        self.inner.lock().unwrap().users.insert(user.id, user);
    }

    /// Test setup helper: insert an event row verbatim, bypassing the
    /// `insert_event` idempotency-key check.
    pub fn seed_event(&self, event: Event) {
        self.inner.lock().unwrap().events.insert(event.id, event);
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn events_for_user(&self, user_id: Uuid) -> Vec<Event> {
        self.inner
            .lock()
            .unwrap()
            .events
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(&id).cloned())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.remove(&id);
        inner.events.retain(|_, e| e.user_id != id);
        Ok(())
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .events
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
        inner.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn find_event_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.inner.lock().unwrap().events.get(&id).cloned())
    }

    async fn find_events_by_user(&self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
        Ok(self.events_for_user(user_id))
    }

    async fn update_event(
        &self,
        event: Event,
        expected_prev_version: i64,
    ) -> Result<Event, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .events
            .get(&event.id)
            .ok_or(StoreError::EventNotFound(event.id))?;
        if current.version != expected_prev_version {
            return Err(StoreError::OptimisticLockConflict {
                id: event.id,
                expected: expected_prev_version,
            });
        }
        let mut stored = event;
        stored.updated_at = Utc::now();
        inner.events.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_processing_after: ChronoDuration,
    ) -> Result<Vec<Event>, StoreError> {
        let stale_cutoff = now - stale_processing_after;
        let mut inner = self.inner.lock().unwrap();

        let mut candidate_ids: Vec<Uuid> = inner
            .events
            .values()
            .filter(|e| {
                (e.status == EventStatus::Pending && e.target_utc <= now)
                    || (e.status == EventStatus::Processing && e.updated_at < stale_cutoff)
            })
            .map(|e| e.id)
            .collect();
        candidate_ids.sort_by_key(|id| inner.events[id].target_utc);
        candidate_ids.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let event = inner.events.get_mut(&id).expect("id came from this map");
            event.status = EventStatus::Processing;
            event.version += 1;
            event.updated_at = now;
            claimed.push(event.clone());
        }
        Ok(claimed)
    }

    async fn find_missed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut missed: Vec<Event> = inner
            .events
            .values()
            .filter(|e| e.status == EventStatus::Pending && e.target_utc < now)
            .cloned()
            .collect();
        missed.sort_by_key(|e| e.target_utc);
        missed.truncate(limit.max(0) as usize);
        Ok(missed)
    }
}

/// A clock whose `now()` is set explicitly, for deterministic scheduling
/// tests (design §8 scenarios are all phrased as "run tick at <instant>").
pub struct AdjustableClock {
    now: Mutex<DateTime<Utc>>,
}

impl AdjustableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for AdjustableClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A single recorded webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub url: String,
    pub body: Value,
    pub idempotency_key: String,
}

/// A webhook client whose outcomes are scripted in advance, one per call,
/// and which records every attempt for assertions. Mirrors the corpus's
/// `FakeBroker`: idempotency-key-aware, since design §8 scenario 3 requires
/// an external endpoint that deduplicates re-invoked deliveries.
pub struct ScriptedWebhookClient {
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
    calls: Mutex<Vec<RecordedDelivery>>,
    seen_idempotency_keys: Mutex<std::collections::HashSet<String>>,
}

impl ScriptedWebhookClient {
    pub fn new(outcomes: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            seen_idempotency_keys: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Always succeeds, regardless of how many times it's called.
    pub fn always_succeeds() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            seen_idempotency_keys: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedDelivery> {
        self.calls.lock().unwrap().clone()
    }

    /// How many distinct idempotency keys this client has ever seen —
    /// exercising design §8 scenario 3's re-invocation-after-reclaim path
    /// without double-counting it as two separate real deliveries.
    pub fn distinct_idempotency_keys(&self) -> usize {
        self.seen_idempotency_keys.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookClient for ScriptedWebhookClient {
    async fn deliver(&self, url: &str, body: &Value, idempotency_key: &str) -> Result<(), DeliveryError> {
        self.calls.lock().unwrap().push(RecordedDelivery {
            url: url.to_string(),
            body: body.clone(),
            idempotency_key: idempotency_key.to_string(),
        });
        self.seen_idempotency_keys
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string());

        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(()),
        }
    }
}
