//! The private / staging / upstream repository triple a relay works on.
//!
//! The event that triggered the relay names the private repository. The
//! staging fork and the upstream repository come from the environment,
//! falling back to the private repository's upstream name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::RepoOverrides;
use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient};
use crate::github::types::{PullRequestEvent, PushEvent, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub pr: Option<u64>,
    #[serde(default)]
    pub sender: Option<String>,
}

impl Repo {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn branch_url(&self) -> String {
        format!("https://github.com/{}/tree/{}", self.slug(), self.branch)
    }

    pub fn pr_url(&self) -> Result<String, RelayError> {
        let pr = self.pr.ok_or_else(|| {
            RelayError::InvalidRequest(format!("{} has no pull request number", self.slug()))
        })?;
        Ok(format!("https://github.com/{}/pull/{}", self.slug(), pr))
    }
}

/// Body `env` of a `/send` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDetails {
    pub private: Repo,
    pub staging: Repo,
    pub upstream: Repo,
    #[serde(default)]
    pub pr_sha: Option<String>,
}

impl RelayDetails {
    /// `KEY=value` lines for shell consumption.
    pub fn env_lines(&self) -> String {
        [
            ("PRIVATE_OWNER", &self.private.owner),
            ("PRIVATE_REPO", &self.private.repo),
            ("PRIVATE_BRANCH", &self.private.branch),
            ("STAGING_OWNER", &self.staging.owner),
            ("STAGING_REPO", &self.staging.repo),
            ("STAGING_BRANCH", &self.staging.branch),
            ("UPSTREAM_OWNER", &self.upstream.owner),
            ("UPSTREAM_REPO", &self.upstream.repo),
            ("UPSTREAM_BRANCH", &self.upstream.branch),
        ]
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
    }

    fn log_summary(&self) {
        for (role, repo) in [
            ("Private", &self.private),
            ("Staging", &self.staging),
            ("Upstream", &self.upstream),
        ] {
            info!("{:>8}: {} @ {} ({})", role, repo.slug(), repo.branch, repo.branch_url());
        }
        if let (Some(sha), Ok(url)) = (&self.pr_sha, self.private.pr_url()) {
            info!(
                "Private pull request @ {} ({}) created by {}",
                sha,
                url,
                self.private.sender.as_deref().unwrap_or("unknown")
            );
        }
    }
}

/// Resolves the default repository name for a role and remembers the answer.
pub struct RepoNameResolver {
    client: GitHubClient,
    auth: Auth,
    memo: Mutex<HashMap<String, String>>,
}

impl RepoNameResolver {
    pub fn new(client: GitHubClient, auth: Auth) -> Self {
        Self {
            client,
            auth,
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn remembered(&self, key: &str) -> Option<String> {
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// The upstream name of `private` if it is a fork, else its own name.
    pub async fn default_name(&self, key: &str, private: &Repo) -> Result<String, RelayError> {
        if let Some(name) = self.remembered(key) {
            return Ok(name);
        }

        let repository: Repository = self
            .client
            .get_json(&format!("/repos/{}", private.slug()), &self.auth, None)
            .await?;
        let name = repository.default_name().to_string();
        debug!("Default name for {} is {}", key, name);

        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), name.clone());
        Ok(name)
    }
}

fn private_from_event(event: &Value) -> Result<(Repo, Option<String>), RelayError> {
    if event.get("pull_request").is_some() {
        let event: PullRequestEvent = serde_json::from_value(event.clone())?;
        let pr = event.pull_request;
        let head_repo = pr
            .head
            .repo
            .ok_or_else(|| RelayError::missing_field("pull_request.head.repo"))?;
        let repo = Repo {
            owner: head_repo.owner.login,
            repo: head_repo.name,
            branch: pr.head.ref_field,
            pr: Some(pr.number),
            sender: Some(pr.user.login),
        };
        Ok((repo, Some(pr.head.sha)))
    } else {
        let event: PushEvent = serde_json::from_value(event.clone())?;
        let repo = Repo {
            owner: event.repository.owner.login,
            repo: event.repository.name,
            branch: event.ref_field,
            pr: None,
            sender: Some(event.sender.login),
        };
        Ok((repo, None))
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, RelayError> {
    value.ok_or_else(|| RelayError::ConfigError(format!("{} must be set", name)))
}

/// Work out the repository triple for `event`.
pub async fn details(
    event: &Value,
    overrides: &RepoOverrides,
    resolver: &RepoNameResolver,
) -> Result<RelayDetails, RelayError> {
    let overrides = overrides.clone().resolved();
    let (defaults, pr_sha) = private_from_event(event)?;

    let private = Repo {
        owner: overrides.private_owner.unwrap_or(defaults.owner),
        repo: overrides.private_repo.unwrap_or(defaults.repo),
        branch: overrides.private_branch.unwrap_or(defaults.branch),
        pr: defaults.pr,
        sender: defaults.sender,
    };

    let staging_repo = match overrides.staging_repo {
        Some(repo) => repo,
        None => resolver.default_name("STAGING_REPO", &private).await?,
    };
    let staging = Repo {
        owner: required(overrides.staging_owner, "STAGING_OWNER")?,
        repo: staging_repo,
        branch: overrides
            .staging_branch
            .unwrap_or_else(|| private.branch.clone()),
        pr: None,
        sender: None,
    };

    let upstream_repo = match overrides.upstream_repo {
        Some(repo) => repo,
        None => resolver.default_name("UPSTREAM_REPO", &private).await?,
    };
    let upstream_pr = overrides
        .upstream_pr
        .map(|pr| {
            pr.trim().parse::<u64>().map_err(|_| {
                RelayError::ConfigError(format!("UPSTREAM_PR {:?} is not a number", pr))
            })
        })
        .transpose()?;
    let upstream = Repo {
        owner: required(overrides.upstream_owner, "UPSTREAM_OWNER")?,
        repo: upstream_repo,
        branch: overrides
            .upstream_branch
            .unwrap_or_else(|| "master".to_string()),
        pr: upstream_pr,
        sender: None,
    };

    let details = RelayDetails {
        private,
        staging,
        upstream,
        pr_sha,
    };
    details.log_summary();
    Ok(details)
}
