//! bday-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, connects to the
//! store, wires the dispatch queue and worker pool, starts the scheduler
//! tick, and serves the ops HTTP surface. All route handlers live in
//! `routes.rs`; all shared state lives in `state.rs`; the tick loop lives in
//! `tick.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::Method;
use bday_config::Settings;
use bday_core::{Clock, HandlerRegistry, Store, SystemClock};
use bday_daemon::{routes, state, tick};
use bday_webhook::{HttpWebhookClient, WebhookConfig};
use bday_worker::Dispatcher;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = Settings::from_env().context("loading configuration")?;

    let pool = bday_db::connect(&settings.database_url)
        .await
        .context("connecting to the event store")?;
    bday_db::migrate(&pool).await.context("running migrations")?;
    let store: Arc<dyn Store> = Arc::new(bday_db::PgStore::new(pool));

    let webhook = Arc::new(HttpWebhookClient::new(WebhookConfig {
        attempts: settings.webhook_retry_count,
        per_attempt_timeout: settings.webhook_timeout,
        base_backoff: Duration::from_secs(1),
    }));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handlers = Arc::new(HandlerRegistry::with_defaults());

    let (dispatcher, receiver) = Dispatcher::channel(settings.claim_batch_limit.max(1) as usize);
    let worker_deps = Arc::new(bday_worker::WorkerDeps {
        store: Arc::clone(&store),
        webhook: webhook as Arc<dyn bday_core::WebhookClient>,
        clock: Arc::clone(&clock),
        handlers: Arc::clone(&handlers),
        default_webhook_url: settings.default_webhook_url.clone(),
    });
    let worker_handles = bday_worker::spawn(settings.worker_pool_size, worker_deps, receiver);

    let shared = Arc::new(state::AppState::new(
        settings,
        store,
        clock,
        handlers,
        dispatcher,
    ));

    tick::log_startup_backlog(&shared).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tick_state = Arc::clone(&shared);
    let tick_handle = tokio::spawn(async move { tick::run(tick_state, shutdown_rx).await });

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::new().allow_methods([Method::GET]));

    let addr: std::net::SocketAddr = shared
        .settings
        .ops_addr
        .parse()
        .context("parsing BDAY_OPS_ADDR")?;
    info!("bday-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    // The tick is stopped first; workers drain whatever they already
    // claimed but accept no new batches once the channel's sender is gone.
    let _ = shutdown_tx.send(true);
    let _ = tick_handle.await;
    drop(shared);
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
