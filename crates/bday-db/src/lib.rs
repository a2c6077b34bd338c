//! Postgres adapter for `bday_core::Store` (design §4.2, §4.4).
//!
//! Grounded directly on this workspace's outbox claim pattern: `claim_due`
//! is a single `FOR UPDATE SKIP LOCKED` CTE folded into an `UPDATE ...
//! RETURNING`, so no two concurrent claimers ever return the same row and
//! neither blocks on the other's locks.

use async_trait::async_trait;
use bday_core::{NewEvent, Store, StoreError};
use bday_schemas::{Event, EventStatus, EventType, User};
use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

pub const ENV_DB_URL: &str = "BDAY_DATABASE_URL";

/// Connect to Postgres using `BDAY_DATABASE_URL`.
pub async fn connect_from_env() -> anyhow::Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| anyhow::anyhow!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Run the embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Test helper: connect from env and ensure migrations are applied.
pub async fn testkit_db_pool() -> anyhow::Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_infra(err: sqlx::Error) -> StoreError {
    StoreError::Infrastructure(err.to_string())
}

fn map_user_row(row: sqlx::postgres::PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id").map_err(map_infra)?,
        first_name: row.try_get("first_name").map_err(map_infra)?,
        last_name: row.try_get("last_name").map_err(map_infra)?,
        date_of_birth: row.try_get("date_of_birth").map_err(map_infra)?,
        timezone: row.try_get("timezone").map_err(map_infra)?,
        created_at: row.try_get("created_at").map_err(map_infra)?,
        updated_at: row.try_get("updated_at").map_err(map_infra)?,
    })
}

fn map_event_row(row: sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let status_str: String = row.try_get("status").map_err(map_infra)?;
    let event_type_str: String = row.try_get("event_type").map_err(map_infra)?;
    Ok(Event {
        id: row.try_get("id").map_err(map_infra)?,
        user_id: row.try_get("user_id").map_err(map_infra)?,
        event_type: EventType::from_str(&event_type_str)
            .map_err(StoreError::Infrastructure)?,
        status: EventStatus::from_str(&status_str).map_err(StoreError::Infrastructure)?,
        target_utc: row.try_get("target_utc").map_err(map_infra)?,
        target_local_date: row.try_get("target_local_date").map_err(map_infra)?,
        target_local_time: row.try_get("target_local_time").map_err(map_infra)?,
        target_zone: row.try_get("target_zone").map_err(map_infra)?,
        executed_at: row.try_get("executed_at").map_err(map_infra)?,
        failure_reason: row.try_get("failure_reason").map_err(map_infra)?,
        retry_count: row.try_get("retry_count").map_err(map_infra)?,
        version: row.try_get("version").map_err(map_infra)?,
        idempotency_key: row.try_get("idempotency_key").map_err(map_infra)?,
        delivery_payload: row.try_get("delivery_payload").map_err(map_infra)?,
        created_at: row.try_get("created_at").map_err(map_infra)?,
        updated_at: row.try_get("updated_at").map_err(map_infra)?,
    })
}

const EVENT_COLUMNS: &str = "id, user_id, event_type, status, target_utc, target_local_date, \
     target_local_time, target_zone, executed_at, failure_reason, retry_count, version, \
     idempotency_key, delivery_payload, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            insert into users (id, first_name, last_name, date_of_birth, timezone, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (id) do update
               set first_name    = excluded.first_name,
                   last_name     = excluded.last_name,
                   date_of_birth = excluded.date_of_birth,
                   timezone      = excluded.timezone,
                   updated_at    = excluded.updated_at
            returning id, first_name, last_name, date_of_birth, timezone, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.date_of_birth)
        .bind(&user.timezone)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_infra)?;

        map_user_row(row)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "select id, first_name, last_name, date_of_birth, timezone, created_at, updated_at \
             from users where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_infra)?;

        row.map(map_user_row).transpose()
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        // `on delete cascade` on events.user_id removes owned events in the
        // same statement (design §4.8 UserDeleted).
        sqlx::query("delete from users where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_infra)?;
        Ok(())
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let query = format!(
            r#"
            insert into events (
                id, user_id, event_type, status, target_utc, target_local_date,
                target_local_time, target_zone, executed_at, failure_reason,
                retry_count, version, idempotency_key, delivery_payload, created_at, updated_at
            ) values (
                $1, $2, $3, 'PENDING', $4, $5, $6, $7, null, null, 0, 0, $8, $9, $10, $10
            )
            on conflict (idempotency_key) do nothing
            returning {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(new_event.user_id)
            .bind(new_event.event_type.as_str())
            .bind(new_event.target_utc)
            .bind(new_event.target_local_date)
            .bind(new_event.target_local_time)
            .bind(&new_event.target_zone)
            .bind(&new_event.idempotency_key)
            .bind(&new_event.delivery_payload)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_infra)?;

        match row {
            Some(row) => map_event_row(row),
            None => Err(StoreError::DuplicateIdempotencyKey(new_event.idempotency_key)),
        }
    }

    async fn find_event_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let query = format!("select {EVENT_COLUMNS} from events where id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_infra)?;
        row.map(map_event_row).transpose()
    }

    async fn find_events_by_user(&self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let query =
            format!("select {EVENT_COLUMNS} from events where user_id = $1 order by created_at asc");
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_infra)?;
        rows.into_iter().map(map_event_row).collect()
    }

    async fn update_event(
        &self,
        event: Event,
        expected_prev_version: i64,
    ) -> Result<Event, StoreError> {
        let query = format!(
            r#"
            update events
               set status            = $1,
                   target_utc        = $2,
                   target_local_date = $3,
                   target_local_time = $4,
                   target_zone       = $5,
                   executed_at       = $6,
                   failure_reason    = $7,
                   retry_count       = $8,
                   version           = $9,
                   updated_at        = $10
             where id = $11 and version = $12
            returning {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(event.status.as_str())
            .bind(event.target_utc)
            .bind(event.target_local_date)
            .bind(event.target_local_time)
            .bind(&event.target_zone)
            .bind(event.executed_at)
            .bind(&event.failure_reason)
            .bind(event.retry_count)
            .bind(event.version)
            .bind(Utc::now())
            .bind(event.id)
            .bind(expected_prev_version)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_infra)?;

        match row {
            Some(row) => map_event_row(row),
            None => Err(StoreError::OptimisticLockConflict {
                id: event.id,
                expected: expected_prev_version,
            }),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_processing_after: Duration,
    ) -> Result<Vec<Event>, StoreError> {
        let stale_cutoff = now - stale_processing_after;
        let query = format!(
            r#"
            with to_claim as (
                select id
                from events
                where (status = 'PENDING' and target_utc <= $1)
                   or (status = 'PROCESSING' and updated_at < $2)
                order by target_utc asc
                limit $3
                for update skip locked
            )
            update events e
               set status     = 'PROCESSING',
                   version    = e.version + 1,
                   updated_at = $1
             where e.id in (select id from to_claim)
            returning {EVENT_COLUMNS}
            "#
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(stale_cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_infra)?;

        rows.into_iter().map(map_event_row).collect()
    }

    async fn find_missed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError> {
        let query = format!(
            "select {EVENT_COLUMNS} from events \
             where status = 'PENDING' and target_utc < $1 \
             order by target_utc asc limit $2"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_infra)?;
        rows.into_iter().map(map_event_row).collect()
    }
}
