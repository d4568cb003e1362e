//! OAuth user-to-server tokens for pull request senders.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::database::models::{NewToken, Token};
use crate::database::Database;
use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient};
use crate::github::types::User;
use crate::pr_info::PrInfo;

/// Error response from the token endpoint. Shown to the user, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthFailure {
    pub error: String,
    pub error_description: String,
    pub error_uri: String,
    pub fields: BTreeMap<String, String>,
}

impl OAuthFailure {
    fn from_fields(fields: BTreeMap<String, String>) -> Self {
        let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
        Self {
            error: get("error"),
            error_description: get("error_description"),
            error_uri: get("error_uri"),
            fields,
        }
    }

    pub fn to_html(&self) -> String {
        format!(
            "<html>\n <body>\n  <a href=\"{}\">{}</a>\n  <br>\n  <pre>{}</pre>\n </body>\n</html>\n",
            html_escape(&self.error_uri),
            html_escape(&self.error_description),
            html_escape(&format!("{:#?}", self.fields)),
        )
    }
}

/// Outcome of a code exchange or refresh.
#[derive(Debug, Clone)]
pub enum TokenExchange {
    Issued(Token),
    Failed(OAuthFailure),
}

pub(crate) fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse a successful token response for `login`. Every field must be
/// present and the lifetimes must be non-negative seconds that chrono can
/// add to a timestamp.
pub fn parse_token_fields(
    login: &str,
    fields: &BTreeMap<String, String>,
) -> Result<NewToken, RelayError> {
    let field = |key: &str| {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| RelayError::OAuth(format!("token response is missing `{}`", key)))
    };
    let seconds = |key: &str| -> Result<i64, RelayError> {
        let value: i64 = field(key)?
            .trim()
            .parse()
            .map_err(|_| RelayError::OAuth(format!("`{}` is not an integer", key)))?;
        if value < 0 || chrono::TimeDelta::try_seconds(value).is_none() {
            return Err(RelayError::OAuth(format!(
                "`{}` of {} is out of range",
                key, value
            )));
        }
        Ok(value)
    };

    Ok(NewToken {
        login: login.to_string(),
        access_token: field("access_token")?,
        expires_in: seconds("expires_in")?,
        refresh_token: field("refresh_token")?,
        refresh_token_expires_in: seconds("refresh_token_expires_in")?,
        token_type: field("token_type")?,
    })
}

#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    web_base: Url,
    redirect_uri: String,
    api: GitHubClient,
    database: Database,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("web_base", &self.web_base.as_str())
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        web_base: &str,
        sender_base: &str,
        api: GitHubClient,
        database: Database,
    ) -> Result<Self, RelayError> {
        let web_base = Url::parse(web_base)
            .map_err(|e| RelayError::ConfigError(format!("Invalid GitHub web URL {}: {}", web_base, e)))?;
        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            web_base,
            redirect_uri: format!("{}/token", sender_base.trim_end_matches('/')),
            api,
            database,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RelayError> {
        self.web_base
            .join(path)
            .map_err(|e| RelayError::ConfigError(format!("Invalid OAuth endpoint {}: {}", path, e)))
    }

    /// Where to send the user to grant access. `login` pins the GitHub account
    /// to the pull request author.
    pub fn authorize_url(&self, info: &PrInfo, state: &str) -> Result<String, RelayError> {
        let mut url = self.endpoint("login/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state)
            .append_pair("login", &info.user)
            .append_pair("allow_signup", "false");
        Ok(url.to_string())
    }

    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, login: &str, code: &str) -> Result<TokenExchange, RelayError> {
        debug!("Exchanging authorization code for {}", login);
        self.request_token(login, &[("code", code)]).await
    }

    #[instrument(skip(self, token), fields(login = %token.login))]
    pub async fn refresh(&self, token: &Token) -> Result<TokenExchange, RelayError> {
        debug!("Refreshing token {}", token.id);
        self.request_token(
            &token.login,
            &[
                ("refresh_token", token.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ],
        )
        .await
    }

    async fn request_token(
        &self,
        login: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenExchange, RelayError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .api
            .http()
            .post(self.endpoint("login/oauth/access_token")?)
            .form(&form)
            .send()
            .await
            .map_err(|e| RelayError::OAuth(format!("token request failed: {}", e)))?;
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::OAuth(format!("token response unreadable: {}", e)))?;

        let fields: BTreeMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();

        if fields.contains_key("error") {
            let failure = OAuthFailure::from_fields(fields);
            warn!("OAuth exchange for {} failed: {}", login, failure.error);
            return Ok(TokenExchange::Failed(failure));
        }

        let new_token = parse_token_fields(login, &fields)?;
        self.verify_login(&new_token).await?;

        let token = self.database.insert_token(&new_token).await?;
        info!("Issued token for {}", login);
        Ok(TokenExchange::Issued(token))
    }

    async fn verify_login(&self, token: &NewToken) -> Result<(), RelayError> {
        let auth = Auth::OAuth {
            token_type: token.token_type.clone(),
            access_token: token.access_token.clone(),
        };
        let user: User = self.api.get_json("/user", &auth, None).await?;
        if user.login != token.login {
            return Err(RelayError::LoginMismatch {
                expected: token.login.clone(),
                actual: user.login,
            });
        }
        Ok(())
    }
}
