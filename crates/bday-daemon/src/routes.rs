//! Axum router and HTTP handlers for `bday-daemon`'s ops surface (design
//! §4.12): process liveness, readiness, a snapshot of scheduler counters,
//! and the domain-event ingestion endpoint the user context calls into
//! (§4.8, §6).

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bday_schemas::{DomainEvent, User};
use serde::Serialize;

use crate::state::{uptime_secs, AppState, StatsSnapshot};

/// Build the complete ops router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/stats", get(stats))
        .route("/v1/events", post(ingest_event))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    uptime_secs: u64,
}

/// Liveness: the process is up and able to answer HTTP. Never checks the
/// database — that's `readyz`'s job.
pub(crate) async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            uptime_secs: uptime_secs(),
        }),
    )
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    reason: Option<String>,
}

/// Readiness: can this process currently reach the store. A failing
/// `find_missed(limit = 1)` probe means the tick loop would also fail, so
/// this is the cheapest real check available without a dedicated ping.
pub(crate) async fn readyz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    match st.store.find_missed(st.clock.now(), 1).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                reason: None,
            }),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                reason: Some(err.to_string()),
            }),
        ),
    }
}

/// Point-in-time counters accumulated by the tick loop since process start.
pub(crate) async fn stats(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot: StatsSnapshot = st.stats.snapshot();
    (StatusCode::OK, Json(snapshot))
}

#[derive(Serialize)]
struct EventIngestResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The user context's single ingress for domain events (design §4.8): a
/// `UserCreated` seeds the first PENDING event; the other three variants
/// are routed straight to the matching `ReconcileEngine` method.
pub(crate) async fn ingest_event(
    State(st): State<Arc<AppState>>,
    Json(event): Json<DomainEvent>,
) -> Response {
    let outcome = match event {
        DomainEvent::UserCreated {
            user_id,
            first_name,
            last_name,
            date_of_birth,
            timezone,
            ..
        } => {
            let now = st.clock.now();
            let user = User {
                id: user_id,
                first_name,
                last_name,
                date_of_birth,
                timezone,
                created_at: now,
                updated_at: now,
            };
            st.reconcile
                .user_created(user)
                .await
                .map(|_| ())
                .map_err(|err| err.to_string())
        }
        DomainEvent::UserBirthdayChanged {
            user_id,
            new_date_of_birth,
            timezone,
            ..
        } => st
            .reconcile
            .user_birthday_changed(user_id, new_date_of_birth, &timezone)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string()),
        DomainEvent::UserTimezoneChanged {
            user_id,
            new_timezone,
            ..
        } => st
            .reconcile
            .user_timezone_changed(user_id, &new_timezone)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string()),
        DomainEvent::UserDeleted { user_id, .. } => st
            .reconcile
            .user_deleted(user_id)
            .await
            .map_err(|err| err.to_string()),
    };

    match outcome {
        Ok(()) => (
            StatusCode::OK,
            Json(EventIngestResponse { ok: true, error: None }),
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(EventIngestResponse {
                ok: false,
                error: Some(error),
            }),
        )
            .into_response(),
    }
}
