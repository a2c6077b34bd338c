//! Process configuration (design §4.10): a typed `Settings` struct loaded
//! from environment variables. `bday-daemon::main` loads an optional
//! `.env.local` via `dotenvy` before calling [`Settings::from_env`] — this
//! crate only ever reads what's already in the process environment.

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Postgres connection string. No default: the process refuses to start
    /// without one.
    pub database_url: String,
    /// Used when a delivery payload omits `webhookUrl`.
    pub default_webhook_url: String,
    /// Number of worker tasks pulling from the dispatch queue.
    pub worker_pool_size: usize,
    /// How often the scheduler tick calls the claim engine.
    pub tick_interval: Duration,
    /// Max rows returned by a single claim call.
    pub claim_batch_limit: i64,
    /// A PROCESSING row older than this is eligible for reclamation by the
    /// next claim.
    pub stale_processing_after: Duration,
    /// Per-attempt webhook HTTP timeout.
    pub webhook_timeout: Duration,
    /// Total webhook delivery attempts before a transient failure is
    /// reported to the caller.
    pub webhook_retry_count: u32,
    /// Bind address for the ops HTTP surface (`/healthz`, `/readyz`, `/v1/stats`).
    pub ops_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_var("BDAY_DATABASE_URL")?,
            default_webhook_url: required_var("BDAY_DEFAULT_WEBHOOK_URL")?,
            worker_pool_size: parsed_var_or("BDAY_WORKER_POOL_SIZE", 4)?,
            tick_interval: Duration::from_secs(parsed_var_or("BDAY_TICK_INTERVAL_SECS", 60)?),
            claim_batch_limit: parsed_var_or("BDAY_CLAIM_BATCH_LIMIT", 100)?,
            stale_processing_after: Duration::from_secs(
                parsed_var_or::<u64>("BDAY_STALE_PROCESSING_MINUTES", 10)? * 60,
            ),
            webhook_timeout: Duration::from_secs(parsed_var_or("BDAY_WEBHOOK_TIMEOUT_SECS", 10)?),
            webhook_retry_count: parsed_var_or("BDAY_WEBHOOK_RETRY_COUNT", 3)?,
            ops_addr: std::env::var("BDAY_OPS_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8899".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn parsed_var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("environment variable {name} is not a valid value")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading environment variable {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for name in [
            "BDAY_DATABASE_URL",
            "BDAY_DEFAULT_WEBHOOK_URL",
            "BDAY_WORKER_POOL_SIZE",
            "BDAY_TICK_INTERVAL_SECS",
            "BDAY_CLAIM_BATCH_LIMIT",
            "BDAY_STALE_PROCESSING_MINUTES",
            "BDAY_WEBHOOK_TIMEOUT_SECS",
            "BDAY_WEBHOOK_RETRY_COUNT",
            "BDAY_OPS_ADDR",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BDAY_DEFAULT_WEBHOOK_URL", "https://example.com/hook");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("BDAY_DATABASE_URL"));
        clear_all();
    }

    #[test]
    fn defaults_fill_in_when_only_required_vars_are_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BDAY_DATABASE_URL", "postgres://localhost/bday");
        std::env::set_var("BDAY_DEFAULT_WEBHOOK_URL", "https://example.com/hook");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.worker_pool_size, 4);
        assert_eq!(settings.tick_interval, Duration::from_secs(60));
        assert_eq!(settings.claim_batch_limit, 100);
        assert_eq!(settings.stale_processing_after, Duration::from_secs(600));
        assert_eq!(settings.webhook_timeout, Duration::from_secs(10));
        assert_eq!(settings.webhook_retry_count, 3);
        clear_all();
    }

    #[test]
    fn overridden_vars_are_respected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BDAY_DATABASE_URL", "postgres://localhost/bday");
        std::env::set_var("BDAY_DEFAULT_WEBHOOK_URL", "https://example.com/hook");
        std::env::set_var("BDAY_WORKER_POOL_SIZE", "8");
        std::env::set_var("BDAY_CLAIM_BATCH_LIMIT", "250");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.worker_pool_size, 8);
        assert_eq!(settings.claim_batch_limit, 250);
        clear_all();
    }

    #[test]
    fn malformed_numeric_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BDAY_DATABASE_URL", "postgres://localhost/bday");
        std::env::set_var("BDAY_DEFAULT_WEBHOOK_URL", "https://example.com/hook");
        std::env::set_var("BDAY_WORKER_POOL_SIZE", "not-a-number");

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("BDAY_WORKER_POOL_SIZE"));
        clear_all();
    }
}
