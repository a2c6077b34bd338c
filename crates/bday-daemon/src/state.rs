//! Shared runtime state for `bday-daemon`.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bday_config::Settings;
use bday_core::{Clock, HandlerRegistry, Store};
use bday_reconcile::ReconcileEngine;
use bday_worker::Dispatcher;
use serde::Serialize;

/// Point-in-time counters surfaced at `GET /v1/stats`. Updated from the
/// tick loop as batches are claimed; cheap atomics, no lock contention with
/// the hot path.
#[derive(Default)]
pub struct Stats {
    pub claimed_total: AtomicU64,
    pub ticks_total: AtomicU64,
    pub tick_errors_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub claimed_total: u64,
    pub ticks_total: u64,
    pub tick_errors_total: u64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            claimed_total: self.claimed_total.load(Ordering::Relaxed),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            tick_errors_total: self.tick_errors_total.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable (Arc) handle shared across all Axum handlers and the tick loop.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub handlers: Arc<HandlerRegistry>,
    pub dispatcher: Dispatcher,
    pub reconcile: ReconcileEngine,
    pub stats: Stats,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        handlers: Arc<HandlerRegistry>,
        dispatcher: Dispatcher,
    ) -> Self {
        let reconcile = ReconcileEngine::new(Arc::clone(&store), Arc::clone(&handlers), Arc::clone(&clock));
        Self {
            settings,
            store,
            clock,
            handlers,
            dispatcher,
            reconcile,
            stats: Stats::default(),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}
