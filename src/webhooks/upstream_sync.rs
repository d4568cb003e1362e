use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::RelayError;
use crate::relay::dispatch::{branch_from_ref, is_tracked_branch};
use crate::relay::pretty_sorted;
use crate::server::AppState;
use crate::webhooks::{echo_error, parse_body, verify_delivery};

#[derive(Debug, Deserialize)]
pub struct ManualQuery {
    pub repo: Option<String>,
    pub branch: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(targets))
        .route("/hook", get(hook).post(hook))
        .route("/manual", get(manual).post(manual))
}

fn json_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

async fn dispatch(state: &AppState, repo: &str, branch: &str) -> Result<Response, RelayError> {
    let targets = state.installations.get().await?;
    info!(
        "Dispatching {} for {}@{} to {} installation(s)",
        state.dispatcher.workflow(),
        repo,
        branch,
        targets.len()
    );
    let results = state.dispatcher.trigger_all(&targets, repo, branch).await;
    Ok(json_response(pretty_sorted(&results)?))
}

fn push_target(payload: &Value) -> Result<(String, String), RelayError> {
    let repo = payload
        .get("repository")
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::missing_field("repository.name"))?;
    let git_ref = payload
        .get("ref")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::missing_field("ref"))?;
    Ok((repo.to_string(), branch_from_ref(git_ref)?.to_string()))
}

/// Push webhook from an upstream repository.
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

    let (repo, branch) = match push_target(&payload) {
        Ok(target) => target,
        Err(e) => return Ok(echo_error(&e, &payload)),
    };
    if !is_tracked_branch(&branch) {
        info!("Ignoring push to {}@{}", repo, branch);
        return Ok(json_response("[]".to_string()));
    }
    dispatch(&state, &repo, &branch).await
}

pub async fn manual(
    State(state): State<AppState>,
    Query(query): Query<ManualQuery>,
) -> Result<Response, RelayError> {
    let Some(repo) = query.repo.filter(|r| !r.is_empty()) else {
        return Ok((StatusCode::BAD_REQUEST, "Missing required \"repo\" argument.").into_response());
    };
    let Some(branch) = query.branch.filter(|b| !b.is_empty()) else {
        return Ok((StatusCode::BAD_REQUEST, "Missing required \"branch\" argument.").into_response());
    };
    dispatch(&state, &repo, &branch).await
}

/// Accounts the fan-out currently reaches.
pub async fn targets(State(state): State<AppState>) -> Result<Response, RelayError> {
    let targets = state.installations.get().await?;
    Ok(json_response(serde_json::to_string(&targets)?))
}
