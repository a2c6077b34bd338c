//! Webhook client adapter (design §4.6): HTTP POST with exponential backoff,
//! status-class error classification, and an idempotency header.

use async_trait::async_trait;
use bday_core::{DeliveryError, WebhookClient};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub attempts: u32,
    pub per_attempt_timeout: Duration,
    pub base_backoff: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            per_attempt_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_secs(1),
        }
    }
}

pub struct HttpWebhookClient {
    http: Client,
    config: WebhookConfig,
}

impl HttpWebhookClient {
    pub fn new(config: WebhookConfig) -> Self {
        let http = Client::builder()
            .timeout(config.per_attempt_timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { http, config }
    }
}

impl Default for HttpWebhookClient {
    fn default() -> Self {
        Self::new(WebhookConfig::default())
    }
}

/// How a single HTTP attempt's outcome is classified (design §4.6/§7).
enum AttemptOutcome {
    Success,
    Permanent { status: u16, body: String },
    Transient(String),
}

fn classify_status(status: StatusCode) -> bool {
    // true => transient (worth retrying)
    if status.is_success() {
        return false;
    }
    let code = status.as_u16();
    code == 429 || code == 408 || status.is_server_error()
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn deliver(&self, url: &str, body: &Value, idempotency_key: &str) -> Result<(), DeliveryError> {
        let mut last_transient: Option<String> = None;

        for attempt in 0..self.config.attempts {
            let outcome = self.attempt(url, body, idempotency_key).await;

            match outcome {
                AttemptOutcome::Success => return Ok(()),
                AttemptOutcome::Permanent { status, body } => {
                    return Err(DeliveryError::Permanent { status, body });
                }
                AttemptOutcome::Transient(cause) => {
                    warn!(attempt, %cause, "transient webhook delivery failure");
                    last_transient = Some(cause);
                    if attempt + 1 < self.config.attempts {
                        tokio::time::sleep(backoff_with_jitter(self.config.base_backoff, attempt)).await;
                    }
                }
            }
        }

        Err(DeliveryError::Transient(
            last_transient.unwrap_or_else(|| "retries exhausted".to_string()),
        ))
    }
}

impl HttpWebhookClient {
    async fn attempt(&self, url: &str, body: &Value, idempotency_key: &str) -> AttemptOutcome {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    AttemptOutcome::Success
                } else if classify_status(status) {
                    AttemptOutcome::Transient(format!("status {}", status.as_u16()))
                } else {
                    let body_text = resp.text().await.unwrap_or_default();
                    AttemptOutcome::Permanent {
                        status: status.as_u16(),
                        body: body_text,
                    }
                }
            }
            Err(err) => AttemptOutcome::Transient(err.to_string()),
        }
    }
}

/// `base * 2^attempt`, jittered +-20%, matching the 1s/2s/4s schedule in
/// design §4.6.
fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let nominal = base.as_secs_f64() * 2f64.powi(attempt as i32);
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (nominal * (1.0 + jitter_frac)).max(0.0);
    Duration::from_secs_f64(jittered)
}
