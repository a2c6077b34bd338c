//! Delivery payload schema validation (design §4.5 step 1, §7
//! `ValidationError`). Deliberately tiny and dependency-free: this is the
//! last gate before a webhook call is attempted.

use bday_schemas::DeliveryPayload;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("delivery_payload is not a valid object: {0}")]
    Malformed(String),
    #[error("message must be a non-empty string")]
    EmptyMessage,
    #[error("webhookUrl is not an absolute URL: {0}")]
    InvalidWebhookUrl(String),
}

/// Parses and validates `raw` against the fixed schema: `message` is a
/// non-empty string; `webhookUrl`, if present, must be an absolute URL.
/// A missing `webhookUrl` is valid — the worker falls back to the
/// configured default (design §6).
pub fn validate_delivery_payload(raw: &Value) -> Result<DeliveryPayload, ValidationError> {
    let payload: DeliveryPayload = serde_json::from_value(raw.clone())
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if payload.message.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    if let Some(url) = &payload.webhook_url {
        if !is_absolute_http_url(url) {
            return Err(ValidationError::InvalidWebhookUrl(url.clone()));
        }
    }

    Ok(payload)
}

fn is_absolute_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
