use reqwest::{header, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::RelayError;

pub const USER_AGENT: &str = concat!("pr-relay/", env!("CARGO_PKG_VERSION"));

/// HTTP verbs the REST helpers accept. Bodies are required for `Post` and
/// `Patch` and rejected for `Get` and `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Get,
    Post,
    Patch,
    Delete,
}

impl Mode {
    fn method(self) -> Method {
        match self {
            Mode::Get => Method::GET,
            Mode::Post => Method::POST,
            Mode::Patch => Method::PATCH,
            Mode::Delete => Method::DELETE,
        }
    }

    fn takes_body(self) -> bool {
        matches!(self, Mode::Post | Mode::Patch)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method())
    }
}

/// Credentials attached to a request.
#[derive(Clone)]
pub enum Auth {
    Anonymous,
    /// Installation or personal token, sent as `token <value>`.
    Token(String),
    /// App JWT, sent as `Bearer <value>`.
    Bearer(String),
    /// OAuth user token with the scheme GitHub returned (usually `bearer`).
    OAuth { token_type: String, access_token: String },
}

impl Auth {
    fn header_value(&self) -> Option<String> {
        match self {
            Auth::Anonymous => None,
            Auth::Token(token) => Some(format!("token {}", token)),
            Auth::Bearer(token) => Some(format!("Bearer {}", token)),
            Auth::OAuth {
                token_type,
                access_token,
            } => Some(format!("{} {}", token_type, access_token)),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Auth::Anonymous => "Anonymous",
            Auth::Token(_) => "Token",
            Auth::Bearer(_) => "Bearer",
            Auth::OAuth { .. } => "OAuth",
        };
        write!(f, "Auth::{}(..)", kind)
    }
}

pub fn accept_header(preview: Option<&str>) -> String {
    match preview {
        Some(preview) => format!("application/vnd.github.{}+json", preview),
        None => "application/vnd.github.v3+json".to_string(),
    }
}

/// Remove `null` members from every object in `value`, recursively.
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_nulls(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Thin JSON client for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Resolve `path` against the API base. Absolute URLs (such as the
    /// `access_tokens_url` GitHub hands out) pass through untouched.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_base, path.trim_start_matches('/'))
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        auth: &Auth,
        preview: Option<&str>,
    ) -> Result<T, RelayError> {
        self.send_json::<Value, T>(Mode::Get, path, auth, None, preview)
            .await
    }

    pub async fn send_json<B, T>(
        &self,
        mode: Mode,
        path: &str,
        auth: &Auth,
        body: Option<&B>,
        preview: Option<&str>,
    ) -> Result<T, RelayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let value = self.send_value(mode, path, auth, body, preview).await?;
        serde_json::from_value(value).map_err(|e| {
            RelayError::GitHubError(format!("Unexpected response shape from {}: {}", path, e))
        })
    }

    /// Send a request and return the decoded JSON body; an empty body is
    /// `Value::Null`. Non-2xx responses become [`RelayError::GitHubApi`].
    pub async fn send_value<B>(
        &self,
        mode: Mode,
        path: &str,
        auth: &Auth,
        body: Option<&B>,
        preview: Option<&str>,
    ) -> Result<Value, RelayError>
    where
        B: Serialize + ?Sized,
    {
        if mode.takes_body() != body.is_some() {
            return Err(RelayError::InvalidRequest(format!(
                "{} {} {}",
                mode,
                path,
                if mode.takes_body() {
                    "requires a JSON body"
                } else {
                    "does not take a body"
                }
            )));
        }

        let url = self.url(path);
        let mut request = self
            .http
            .request(mode.method(), &url)
            .header(header::ACCEPT, accept_header(preview));
        if let Some(value) = auth.header_value() {
            request = request.header(header::AUTHORIZATION, value);
        }
        if let Some(body) = body {
            let mut json = serde_json::to_value(body)?;
            strip_nulls(&mut json);
            request = request.json(&json);
        }

        debug!("GitHub {} {}", mode, url);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(text);
            warn!("GitHub {} {} failed with {}: {}", mode, url, status, message);
            return Err(RelayError::github_api(status.as_u16(), message));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RelayError::GitHubError(format!("Invalid JSON from {}: {}", url, e)))
    }
}
