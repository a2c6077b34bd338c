//! Recovery scanner (C10) and scheduler tick (C11): a `tokio::time::interval`
//! loop that repeatedly calls the claim engine and feeds claimed events into
//! the dispatch queue. Recovery and normal operation share this one path —
//! the claim query selects `target_utc <= now`, so a backlog built up during
//! downtime drains across successive ticks exactly like on-time events do.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::state::AppState;

/// Logs how many PENDING rows are already overdue at boot. Purely
/// observational — this function never claims anything itself; the
/// synchronous drain design §4.9 asks for at startup is `run()`'s first
/// `interval.tick()`, which tokio fires immediately rather than waiting a
/// full period, so the backlog this function reports is claimed before any
/// other work happens.
pub async fn log_startup_backlog(state: &AppState) {
    match state
        .store
        .find_missed(state.clock.now(), state.settings.claim_batch_limit)
        .await
    {
        Ok(missed) if missed.is_empty() => info!("no overdue events at startup"),
        Ok(missed) => warn!(count = missed.len(), "overdue events found at startup; first tick will drain them"),
        Err(err) => error!(%err, "startup backlog scan failed; continuing anyway"),
    }
}

/// Runs the tick loop until the process is asked to shut down. A single
/// tick's error is logged and swallowed (design §4.9) — the daemon must
/// never die from one bad tick; the next interval retries.
pub async fn run(state: Arc<AppState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(state.settings.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    info!("shutdown requested; tick loop stopping before claiming a new batch");
                    return;
                }
                if let Err(err) = run_one_tick(&state).await {
                    state.stats.tick_errors_total.fetch_add(1, Ordering::Relaxed);
                    error!(%err, "tick failed; will retry next interval");
                }
                state.stats.ticks_total.fetch_add(1, Ordering::Relaxed);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested; tick loop stopping");
                    return;
                }
            }
        }
    }
}

async fn run_one_tick(state: &AppState) -> Result<(), bday_core::StoreError> {
    let now = state.clock.now();
    let stale_after = chrono::Duration::from_std(state.settings.stale_processing_after)
        .unwrap_or_else(|_| chrono::Duration::minutes(10));
    let claimed = state
        .store
        .claim_due(now, state.settings.claim_batch_limit, stale_after)
        .await?;

    if claimed.is_empty() {
        return Ok(());
    }

    info!(count = claimed.len(), "claimed batch; dispatching to worker pool");
    state.stats.claimed_total.fetch_add(claimed.len() as u64, Ordering::Relaxed);

    for event in claimed {
        if state.dispatcher.enqueue(event).await.is_err() {
            error!("dispatch queue closed; no workers remain to process this claimed batch");
            break;
        }
    }

    Ok(())
}
