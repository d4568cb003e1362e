use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::RelayError;
use crate::oauth::TokenExchange;
use crate::relay::{pretty_sorted, SendRequest, SendResult};
use crate::server::AppState;
use crate::webhooks::{parse_body, required_param};

#[derive(Debug, Deserialize)]
pub struct SenderQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub user: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/send", get(send).post(send))
        .route("/revoke", get(revoke).post(revoke))
        .route("/auth", get(auth))
        .route("/token", get(token))
        .route("/refresh", get(refresh))
        .route("/hook", get(hook).post(hook))
}

fn json_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        format!("{}\n", body),
    )
        .into_response()
}

/// Open (or find) the upstream pull request for a private one.
pub async fn send(State(state): State<AppState>, body: Bytes) -> Result<Response, RelayError> {
    let request: SendRequest = serde_json::from_slice(&body)?;
    match state.sender.send(&request).await? {
        SendResult::PullRequests(pulls) => Ok(json_response(serde_json::to_string(&pulls)?)),
        SendResult::OAuthFailed(failure) => Ok(Html(failure.to_html()).into_response()),
    }
}

pub async fn revoke(
    State(state): State<AppState>,
    Query(query): Query<SenderQuery>,
) -> Result<String, RelayError> {
    let user = required_param(query.user, "user")?;
    state.database.delete_tokens(&user).await?;
    Ok(format!("Removed tokens for {}", user))
}

/// Send the pull request author to GitHub to authorize the relay.
pub async fn auth(
    State(state): State<AppState>,
    Query(query): Query<SenderQuery>,
) -> Result<Redirect, RelayError> {
    let info = state
        .links
        .from_token(&required_param(query.state, "state")?)?;
    let url = state
        .oauth
        .authorize_url(&info, &state.links.to_token(&info))?;
    info!("Sending {} to GitHub for authorization", info.user);
    Ok(Redirect::to(&url))
}

/// OAuth callback: store the token and let the auth check pick it up.
pub async fn token(
    State(state): State<AppState>,
    Query(query): Query<SenderQuery>,
) -> Result<Response, RelayError> {
    let info = state
        .links
        .from_token(&required_param(query.state, "state")?)?;
    let code = required_param(query.code, "code")?;

    match state.oauth.exchange_code(&info.user, &code).await? {
        TokenExchange::Issued(_) => Ok(Redirect::to(&state.links.hook_url(&info)).into_response()),
        TokenExchange::Failed(failure) => Ok(Html(failure.to_html()).into_response()),
    }
}

pub async fn refresh(
    State(state): State<AppState>,
    Query(query): Query<SenderQuery>,
) -> Result<Html<String>, RelayError> {
    let user = required_param(query.user, "user")?;
    let current = state
        .database
        .latest_token(&user)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("no token for {}", user)))?;
    let before = current.to_table(Utc::now());

    let refreshed = match state.oauth.refresh(&current).await? {
        TokenExchange::Issued(token) => token,
        TokenExchange::Failed(failure) => return Ok(Html(failure.to_html())),
    };
    let after = refreshed.to_table(Utc::now());

    Ok(Html(format!(
        "<html>\n <body>\n  <h1>Before Refresh</h1>\n{}\n  <br>\n\n   <h1>After Refresh</h1>\n{}\n </body>\n</html>\n",
        before, after
    )))
}

/// The stored token of the pull request author named by `state`.
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<SenderQuery>,
) -> Result<Html<String>, RelayError> {
    let info = state
        .links
        .from_token(&required_param(query.state, "state")?)?;
    let token = state
        .database
        .latest_token(&info.user)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("no token for {}", info.user)))?;
    Ok(Html(token.to_html(Utc::now())))
}

/// Echo the delivery back, for inspecting webhook payloads.
pub async fn hook(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(payload) => match pretty_sorted(&payload) {
            Ok(rendered) => json_response(rendered),
            Err(e) => e.into_response(),
        },
        Err(response) => response,
    }
}
