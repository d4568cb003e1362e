use config::{builder::DefaultState, Config, ConfigBuilder, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::RelayError;

/// Service configuration, read from the process environment.
///
/// Field names are the lower-cased environment variable names, so
/// `CLIENT_ID` fills `client_id` and `GITHUB_APP_ID` fills `github_app_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,

    /// OAuth application credentials.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Secret the state tokens are signed with.
    #[serde(default)]
    pub client_token: String,

    pub github_app_id: Option<u64>,
    pub github_private_key_path: Option<String>,
    pub github_token: Option<String>,
    pub github_webhook_secret: Option<String>,

    pub github_api_url: String,
    pub github_web_url: String,
    pub sender_base_url: String,
    pub auth_check_base_url: String,

    /// Comma separated `owner/repo` slugs the auth check runs on. Empty means all.
    #[serde(default)]
    pub auth_check_repos: String,
    /// Comma separated account logins used when no GitHub App is configured.
    #[serde(default)]
    pub dispatch_targets: String,
    pub dispatch_workflow: String,

    pub installation_refresh_secs: u64,
    pub installation_wait_secs: u64,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, RelayError> {
        Self::from_builder(Config::builder().add_source(Environment::default()))
    }

    /// Build a configuration from explicit key/value pairs on top of the defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(key, value)?;
        }
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, RelayError> {
        let config = builder
            .set_default("database_url", "sqlite://pr-relay.db?mode=rwc")?
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("github_api_url", "https://api.github.com")?
            .set_default("github_web_url", "https://github.com")?
            .set_default("sender_base_url", "https://pr.gha.openroad.tools")?
            .set_default("auth_check_base_url", "https://a.gha.openroad.tools")?
            .set_default(
                "dispatch_workflow",
                "github-actions-cron-sync-fork-from-upstream.yml",
            )?
            .set_default("installation_refresh_secs", 300)?
            .set_default("installation_wait_secs", 30)?
            .set_default("http_timeout_secs", 30)?
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn bind_address(&self) -> Result<SocketAddr, RelayError> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .map_err(|e| RelayError::ConfigError(format!("Invalid bind address: {}", e)))
    }

    pub fn auth_check_repos(&self) -> Vec<String> {
        split_list(&self.auth_check_repos)
    }

    pub fn dispatch_targets(&self) -> Vec<String> {
        split_list(&self.dispatch_targets)
    }

    pub fn installation_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.installation_refresh_secs)
    }

    pub fn installation_max_wait(&self) -> Duration {
        Duration::from_secs(self.installation_wait_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn require_state_secret(&self) -> Result<(), RelayError> {
        if self.client_token.is_empty() {
            return Err(RelayError::ConfigError(
                "CLIENT_TOKEN must be set to sign state tokens".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_oauth(&self) -> Result<(), RelayError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(RelayError::ConfigError(
                "CLIENT_ID and CLIENT_SECRET must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the GitHub App private key, when an App is configured.
    pub fn github_app_credentials(&self) -> Result<Option<(u64, String)>, RelayError> {
        let (Some(app_id), Some(path)) = (self.github_app_id, &self.github_private_key_path) else {
            return Ok(None);
        };
        let key = std::fs::read_to_string(path).map_err(|e| {
            RelayError::ConfigError(format!("Failed to read private key {}: {}", path, e))
        })?;
        Ok(Some((app_id, key)))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Per-role repository overrides for the private/staging/upstream triple.
///
/// The `ROT13_*` variants exist so owner and branch names are not masked as
/// secrets in action logs; they win over the plain variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoOverrides {
    pub private_owner: Option<String>,
    pub private_repo: Option<String>,
    pub private_branch: Option<String>,
    pub staging_owner: Option<String>,
    pub staging_repo: Option<String>,
    pub staging_branch: Option<String>,
    pub upstream_owner: Option<String>,
    pub upstream_repo: Option<String>,
    pub upstream_branch: Option<String>,
    pub upstream_pr: Option<String>,
    pub rot13_staging_owner: Option<String>,
    pub rot13_upstream_owner: Option<String>,
    pub rot13_upstream_branch: Option<String>,
}

impl RepoOverrides {
    pub fn from_env() -> Result<Self, RelayError> {
        let overrides: Self = Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;
        Ok(overrides.resolved())
    }

    /// Fold the rot13 variants into the plain fields.
    pub fn resolved(mut self) -> Self {
        if let Some(owner) = self.rot13_staging_owner.take() {
            self.staging_owner = Some(rot13(&owner));
        }
        if let Some(owner) = self.rot13_upstream_owner.take() {
            self.upstream_owner = Some(rot13(&owner));
        }
        if let Some(branch) = self.rot13_upstream_branch.take() {
            self.upstream_branch = Some(rot13(&branch));
        }
        self
    }
}

pub fn rot13(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
            _ => c,
        })
        .collect()
}
