pub mod auth_check;
pub mod sender;
pub mod upstream_sync;

use axum::{
    extract::{Path, RawQuery},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::github::webhooks::{verify_signature, SIGNATURE_HEADER};
use crate::relay::pretty_sorted;
use crate::server::AppState;

/// Forward `/localhost/{path}?{query}` to a development server, so OAuth
/// callbacks registered against the production host reach a local checkout.
pub async fn localhost_redirect(Path(path): Path<String>, RawQuery(query): RawQuery) -> Redirect {
    let target = format!(
        "http://localhost:8080/{}?{}",
        path.trim_start_matches('/'),
        query.unwrap_or_default()
    );
    debug!("Redirecting to {}", target);
    Redirect::to(&target)
}

/// Verify `X-Hub-Signature-256` when a webhook secret is configured.
pub(crate) fn verify_delivery(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), RelayError> {
    let Some(secret) = state.config.github_webhook_secret.as_deref() else {
        return Ok(());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(RelayError::InvalidWebhookSignature)?;
    verify_signature(secret, signature, body)
}

pub(crate) fn parse_body(body: &[u8]) -> Result<Value, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected non-JSON body: {}", e);
        (
            StatusCode::BAD_REQUEST,
            format!("{}\n{}", e, String::from_utf8_lossy(body)),
        )
            .into_response()
    })
}

/// The error text followed by the payload that caused it.
pub(crate) fn echo_error(error: &RelayError, payload: &Value) -> Response {
    warn!("Could not handle payload: {}", error);
    (
        StatusCode::BAD_REQUEST,
        format!("{}\n{}", error, pretty_sorted(payload).unwrap_or_default()),
    )
        .into_response()
}

pub(crate) fn required_param(value: Option<String>, name: &str) -> Result<String, RelayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest(format!("Missing required \"{}\" argument.", name)))
}
