use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::RelayError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

pub struct WebhookProcessor;

impl WebhookProcessor {
    /// Classify a delivery from its `X-GitHub-Event` header when present,
    /// falling back to the shape of the payload.
    pub fn process_webhook(event_name: Option<&str>, payload: Value) -> WebhookEvent {
        let action = payload
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let event_type = match event_name {
            Some("pull_request") => WebhookEventType::PullRequest,
            Some("push") => WebhookEventType::Push,
            Some("ping") => WebhookEventType::Ping,
            Some(_) => WebhookEventType::Unknown,
            None if payload.get("pull_request").is_some() => WebhookEventType::PullRequest,
            None if payload.get("ref").is_some() && payload.get("repository").is_some() => {
                WebhookEventType::Push
            }
            None if payload.get("zen").is_some() => WebhookEventType::Ping,
            None => WebhookEventType::Unknown,
        };

        debug!("Classified webhook as {:?} ({})", event_type, action);
        WebhookEvent {
            event_type,
            action,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventType {
    PullRequest,
    Push,
    Ping,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: WebhookEventType,
    pub action: String,
    pub payload: Value,
}

/// Check an `X-Hub-Signature-256` header (`sha256=<hex>`) against `body`.
pub fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> Result<(), RelayError> {
    let Some(expected_hex) = signature_header.strip_prefix("sha256=") else {
        warn!("Webhook signature is missing the sha256= prefix");
        return Err(RelayError::InvalidWebhookSignature);
    };
    let expected = hex::decode(expected_hex).map_err(|_| RelayError::InvalidWebhookSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| {
        warn!("Webhook signature verification failed");
        RelayError::InvalidWebhookSignature
    })
}

pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
