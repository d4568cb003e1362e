use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::crypto::state_token::StateTokenError;

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::GitHubError(format!("HTTP error: {}", err))
    }
}

impl From<octocrab::Error> for RelayError {
    fn from(err: octocrab::Error) -> Self {
        Self::GitHubError(format!("octocrab error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for RelayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::JwtError(err.to_string())
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("GitHub API error: {0}")]
    GitHubError(String),

    #[error("GitHub API returned {status}: {message}")]
    GitHubApi { status: u16, message: String },

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Invalid state token: {0}")]
    StateToken(#[from] StateTokenError),

    #[error("Invalid pull request identity {input:?}: {reason}")]
    InvalidPrInfo { input: String, reason: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Token belongs to {actual}, expected {expected}")]
    LoginMismatch { expected: String, actual: String },

    #[error("No stored credentials for {0}")]
    MissingCredentials(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Installation list unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,
}

impl RelayError {
    pub fn invalid_pr_info(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrInfo {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::InvalidPayload(format!("missing required field `{}`", field))
    }

    pub fn github_api(status: u16, message: impl Into<String>) -> Self {
        Self::GitHubApi {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StateToken(_)
            | Self::InvalidPrInfo { .. }
            | Self::InvalidPayload(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingCredentials(_)
            | Self::LoginMismatch { .. }
            | Self::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GitHubError(_) | Self::GitHubApi { .. } | Self::OAuth(_) => StatusCode::BAD_GATEWAY,
            Self::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfigError(_) | Self::DatabaseError(_) | Self::JwtError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (status, format!("{}\n", self)).into_response()
    }
}
