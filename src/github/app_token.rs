//! GitHub App authentication: app JWTs and per-repository installation tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::types::{InstallationAccessToken, RepoInstallation};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
}

/// Sign a JWT for the App. GitHub caps the lifetime at 10 minutes; `iat` is
/// backdated a minute for clock drift.
#[instrument(skip(private_key_pem))]
pub fn generate_app_jwt(app_id: u64, private_key_pem: &str) -> Result<String, RelayError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RelayError::JwtError(format!("System time error: {}", e)))?;

    let iat = now.as_secs().saturating_sub(60);
    let exp = now.as_secs() + Duration::from_secs(9 * 60).as_secs();
    let claims = Claims {
        iat,
        exp,
        iss: app_id.to_string(),
    };

    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| RelayError::JwtError(format!("Invalid RSA private key: {}", e)))?;
    let token = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

    debug!(app_id, exp, "Generated GitHub App JWT");
    Ok(token)
}

/// Something that can hand out a token authorized for `owner/repo`.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token_for(&self, slug: &str) -> Result<String, RelayError>;
}

/// A fixed token, e.g. the `GITHUB_TOKEN` of an Actions run.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token_for(&self, _slug: &str) -> Result<String, RelayError> {
        Ok(self.0.clone())
    }
}

/// Cached installation tokens are renewed this long before they expire.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
/// GitHub's installation token lifetime, assumed when `expires_at` is absent.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mints installation tokens with the App's private key and reuses each
/// repository's token until shortly before it expires.
#[derive(Clone)]
pub struct GitHubApp {
    app_id: u64,
    private_key_pem: String,
    client: GitHubClient,
    tokens: Arc<Mutex<HashMap<String, CachedToken>>>,
}

impl fmt::Debug for GitHubApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubApp")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl GitHubApp {
    pub fn new(app_id: u64, private_key_pem: String, client: GitHubClient) -> Self {
        Self {
            app_id,
            private_key_pem,
            client,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn jwt(&self) -> Result<String, RelayError> {
        generate_app_jwt(self.app_id, &self.private_key_pem)
    }

    fn cached_token(&self, slug: &str, now: DateTime<Utc>) -> Option<String> {
        let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(slug)
            .filter(|cached| now + margin < cached.expires_at)
            .map(|cached| cached.token.clone())
    }

    /// A token for the installation covering `slug`, minted on first use and
    /// again once the cached one is about to expire.
    pub async fn installation_token(&self, slug: &str) -> Result<String, RelayError> {
        if let Some(token) = self.cached_token(slug, Utc::now()) {
            debug!("Reusing installation token for {}", slug);
            return Ok(token);
        }

        let auth = Auth::Bearer(self.jwt()?);
        let installation: RepoInstallation = self
            .client
            .get_json(&format!("/repos/{}/installation", slug), &auth, None)
            .await?;

        let token: InstallationAccessToken = self
            .client
            .send_json(
                Mode::Post,
                &installation.access_tokens_url,
                &auth,
                Some(&serde_json::json!({})),
                None,
            )
            .await?;

        let expires_at = token.expires_at.unwrap_or_else(|| {
            Utc::now() + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
        });
        info!(
            "Issued installation token for {} (installation {}, expires {})",
            slug, installation.id, expires_at
        );
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).insert(
            slug.to_string(),
            CachedToken {
                token: token.token.clone(),
                expires_at,
            },
        );
        Ok(token.token)
    }
}

#[async_trait]
impl TokenSource for GitHubApp {
    async fn token_for(&self, slug: &str) -> Result<String, RelayError> {
        self.installation_token(slug).await
    }
}
