use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::error::RelayError;
use crate::github::types::PullRequestEvent;
use crate::github::webhooks::{WebhookProcessor, EVENT_HEADER};
use crate::pr_info::PrInfo;
use crate::relay::pretty_sorted;
use crate::server::AppState;
use crate::webhooks::{echo_error, parse_body, required_param, verify_delivery};

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub state: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/revoke", get(revoke).post(revoke))
        .route("/hook", get(hook_redirect).post(hook))
}

fn info_from_query(state: &AppState, query: StateQuery) -> Result<PrInfo, RelayError> {
    state
        .links
        .from_token(&required_param(query.state, "state")?)
}

/// Forget the sender's credentials, refresh the check, and return to the PR.
pub async fn revoke(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Redirect, RelayError> {
    let info = info_from_query(&state, query)?;
    state.database.delete_tokens(&info.user).await?;
    info!("Revoked credentials of {} via {}", info.user, info);
    state.auth_check.run(&info).await?;
    Ok(Redirect::to(&info.pr_url()))
}

/// Re-run the check after the OAuth round trip.
pub async fn hook_redirect(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Redirect, RelayError> {
    let info = info_from_query(&state, query)?;
    state.auth_check.run(&info).await?;
    Ok(Redirect::to(&info.pr_url()))
}

/// Webhook from the private repository. Any delivery carrying a
/// `pull_request` object re-runs the check, whatever its event header
/// (`pull_request`, `pull_request_review`, `pull_request_review_comment`).
pub async fn hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    verify_delivery(&state, &headers, &body)?;
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(response) => return Ok(response),
    };

    let event_name = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    let event = WebhookProcessor::process_webhook(event_name, payload);
    if event.payload.get("pull_request").is_some() {
        info!("Checking {:?} delivery ({})", event.event_type, event.action);
        let info = match serde_json::from_value::<PullRequestEvent>(event.payload.clone())
            .map_err(RelayError::from)
            .and_then(|pr_event| PrInfo::from_pull_request(&pr_event.pull_request))
        {
            Ok(info) => info,
            Err(e) => return Ok(echo_error(&e, &event.payload)),
        };
        if let Some(outcome) = state.auth_check.run(&info).await? {
            return Ok(outcome.report().into_response());
        }
    }

    Ok(format!(
        "Unknown hook action?\n{}",
        pretty_sorted(&event.payload)?
    )
    .into_response())
}
