//! Webhook client port (design §4.6). The concrete `reqwest`-backed adapter
//! lives in `bday-webhook`; `bday-testkit` provides a fake for tests.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 4xx (except 429): no retry, event moves straight to FAILED.
    #[error("permanent delivery error: HTTP {status} body={body}")]
    Permanent { status: u16, body: String },

    /// 5xx/408/429/timeout/network, retries inside the client exhausted:
    /// the event stays PROCESSING and the caller redelivers later.
    #[error("transient delivery error: {0}")]
    Transient(String),
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POSTs `body` to `url`, tagged with `idempotency_key`. `body` is the
    /// delivery payload with `webhookUrl` already stripped (the worker
    /// extracts the URL and passes the rest verbatim — design §6: "any
    /// webhookUrl field is consumed by the client and not forwarded").
    /// Retries transient failures internally per design §4.6; only returns
    /// once retries are exhausted or a definitive outcome (2xx or non-429
    /// 4xx) is known.
    async fn deliver(&self, url: &str, body: &Value, idempotency_key: &str) -> Result<(), DeliveryError>;
}

/// Splits a worker-facing delivery payload into `(url, body_without_url)`,
/// per design §6: `webhookUrl` is consumed and never forwarded in the POST
/// body. Falls back to `default_url` when the payload omits it.
pub fn extract_url_and_strip(payload: &Value, default_url: &str) -> (String, Value) {
    let mut body = payload.clone();
    let url = body
        .as_object_mut()
        .and_then(|obj| obj.remove("webhookUrl"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| default_url.to_string());
    (url, body)
}
