//! Worker pool (design §4.5, §4.6, §4.7): consumes the dispatch queue,
//! validates payloads, calls the webhook client with retries, transitions
//! the event, and seeds next year's recurrence.

use bday_core::{
    generate_recurrence, validate_delivery_payload, Clock, DeliveryError, HandlerRegistry,
    RecurrenceOutcome, Store, Trigger,
};
use bday_schemas::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Shared, read-only dependencies every worker task needs. Bundled behind
/// one `Arc` so spawning N workers is just N clones of a pointer.
pub struct WorkerDeps {
    pub store: Arc<dyn Store>,
    pub webhook: Arc<dyn bday_core::WebhookClient>,
    pub clock: Arc<dyn Clock>,
    pub handlers: Arc<HandlerRegistry>,
    pub default_webhook_url: String,
}

/// How many times a COMPLETED event's recurrence insert is retried before
/// giving up and logging loudly. The completion itself is never rolled
/// back (design §4.7: "the completion must be persisted first"); this
/// bounds the in-process model's best-effort recovery for a recurrence
/// insert that fails for a reason other than the idempotency key already
/// existing (e.g. a transient DB hiccup immediately after completion).
const RECURRENCE_RETRY_ATTEMPTS: u32 = 3;
const RECURRENCE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Spawns `worker_count` tasks pulling from `receiver`. Each task processes
/// at most one event at a time (at-most-one-in-flight-per-worker, design
/// §4.5) and a panic/error in one event's processing never aborts another.
pub fn spawn(
    worker_count: usize,
    deps: Arc<WorkerDeps>,
    receiver: mpsc::Receiver<Event>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..worker_count)
        .map(|worker_id| {
            let deps = Arc::clone(&deps);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move { worker_loop(worker_id, deps, receiver).await })
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    deps: Arc<WorkerDeps>,
    receiver: Arc<Mutex<mpsc::Receiver<Event>>>,
) {
    loop {
        let event = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(event) = event else {
            info!(worker_id, "dispatch queue closed; worker exiting");
            return;
        };

        if let Err(err) = process_event(&deps, event.clone()).await {
            // Independent processing: one event's failure never blocks or
            // aborts the worker loop or any other event (design §4.5).
            warn!(worker_id, event_id = %event.id, %err, "event processing reported an error");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] bday_core::StoreError),
}

/// Processes one claimed (PROCESSING) event to completion or permanent
/// failure. Transient webhook errors are logged and leave the row in
/// PROCESSING for the claim engine's stale-processing reclamation to retry
/// later (design §4.5 step 3) — nothing here propagates that case as an
/// error, since the in-process queue has no external redelivery mechanism
/// to hand it back to.
#[instrument(skip(deps, event), fields(event_id = %event.id, user_id = %event.user_id))]
pub async fn process_event(deps: &WorkerDeps, event: Event) -> Result<(), ProcessError> {
    if let Err(e) = validate_delivery_payload(&event.delivery_payload) {
        return fail_permanently(deps, event, format!("validation: {e}")).await;
    }

    let (url, body) = bday_core::webhook::extract_url_and_strip(
        &event.delivery_payload,
        &deps.default_webhook_url,
    );

    match deps.webhook.deliver(&url, &body, &event.idempotency_key).await {
        Ok(()) => complete_and_recur(deps, event).await,
        Err(DeliveryError::Permanent { status, body }) => {
            fail_permanently(deps, event, format!("HTTP {status}: {body}")).await
        }
        Err(DeliveryError::Transient(cause)) => {
            warn!(event_id = %event.id, %cause, "transient delivery failure; leaving PROCESSING for reclamation");
            Ok(())
        }
    }
}

async fn fail_permanently(deps: &WorkerDeps, event: Event, reason: String) -> Result<(), ProcessError> {
    let prev_version = event.version;
    let failed = bday_core::apply_transition(
        &event,
        Trigger::DeliveryFailedPermanently { reason: reason.clone() },
    )
    .expect("PROCESSING -> FAILED is always a legal transition");
    deps.store.update_event(failed, prev_version).await?;
    error!(event_id = %event.id, %reason, "event permanently failed");
    Ok(())
}

async fn complete_and_recur(deps: &WorkerDeps, event: Event) -> Result<(), ProcessError> {
    let prev_version = event.version;
    let executed_at = deps.clock.now();
    let completed = bday_core::apply_transition(&event, Trigger::DeliverySucceeded { executed_at })
        .expect("PROCESSING -> COMPLETED is always a legal transition");
    let completed = deps.store.update_event(completed, prev_version).await?;
    info!(event_id = %completed.id, "event delivered and marked COMPLETED");

    for attempt in 0..RECURRENCE_RETRY_ATTEMPTS {
        match generate_recurrence(
            deps.store.as_ref(),
            &deps.handlers,
            &completed,
            &deps.default_webhook_url,
        )
        .await
        {
            Ok(RecurrenceOutcome::Inserted(next)) => {
                info!(event_id = %next.id, "seeded next year's recurrence");
                return Ok(());
            }
            Ok(RecurrenceOutcome::AlreadySeeded) => {
                info!("recurrence already seeded by another worker; no-op");
                return Ok(());
            }
            Ok(RecurrenceOutcome::UserGone) => return Ok(()),
            Err(err) if attempt + 1 < RECURRENCE_RETRY_ATTEMPTS => {
                warn!(attempt, %err, "recurrence generation failed; retrying");
                tokio::time::sleep(RECURRENCE_RETRY_DELAY).await;
            }
            Err(err) => {
                error!(event_id = %completed.id, %err, "recurrence generation failed after retries; next year's event was NOT seeded");
                return Ok(());
            }
        }
    }

    Ok(())
}
