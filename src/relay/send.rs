use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::database::Database;
use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::types::CreatePullRequest;
use crate::oauth::{OAuthClient, OAuthFailure, TokenExchange};
use crate::repos::RelayDetails;

pub const PULLS_FOR_COMMIT_PREVIEW: &str = "groot-preview";

/// Body of `POST /send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub event_json: Value,
    pub env: RelayDetails,
}

#[derive(Debug, Clone)]
pub enum SendResult {
    /// The upstream pull request, or every open match when the last one has
    /// no number.
    PullRequests(Value),
    OAuthFailed(OAuthFailure),
}

/// Opens the upstream pull request on behalf of the private PR's author.
#[derive(Debug, Clone)]
pub struct PrSender {
    github: GitHubClient,
    oauth: OAuthClient,
    database: Database,
}

impl PrSender {
    pub fn new(github: GitHubClient, oauth: OAuthClient, database: Database) -> Self {
        Self {
            github,
            oauth,
            database,
        }
    }

    pub async fn send(&self, request: &SendRequest) -> Result<SendResult, RelayError> {
        let env = &request.env;
        let sender = env
            .private
            .sender
            .as_deref()
            .ok_or_else(|| RelayError::missing_field("env.private.sender"))?;
        let pr_sha = env
            .pr_sha
            .as_deref()
            .ok_or_else(|| RelayError::missing_field("env.pr_sha"))?;

        let stored = self
            .database
            .latest_token(sender)
            .await?
            .ok_or_else(|| RelayError::MissingCredentials(sender.to_string()))?;
        let token = match self.oauth.refresh(&stored).await? {
            TokenExchange::Issued(token) => token,
            TokenExchange::Failed(failure) => {
                warn!("Could not refresh token for {}", sender);
                return Ok(SendResult::OAuthFailed(failure));
            }
        };
        let auth = Auth::OAuth {
            token_type: token.token_type.clone(),
            access_token: token.access_token.clone(),
        };

        let pulls: Vec<Value> = self
            .github
            .get_json(
                &format!("/repos/{}/commits/{}/pulls", env.staging.slug(), pr_sha),
                &auth,
                Some(PULLS_FOR_COMMIT_PREVIEW),
            )
            .await?;
        let mut open: Vec<Value> = pulls
            .into_iter()
            .filter(|pr| pr.get("state").and_then(Value::as_str) == Some("open"))
            .collect();

        if open.is_empty() {
            let create = create_request(request)?;
            info!(
                "Opening pull request {} -> {}:{}",
                create.head,
                env.upstream.slug(),
                create.base
            );
            let created = self
                .github
                .send_value(
                    Mode::Post,
                    &format!("/repos/{}/pulls", env.upstream.slug()),
                    &auth,
                    Some(&create),
                    None,
                )
                .await?;
            open.push(created);
        }

        let last_has_number = open
            .last()
            .is_some_and(|pr| pr.get("number").is_some());
        if last_has_number {
            Ok(SendResult::PullRequests(open.pop().unwrap_or(Value::Null)))
        } else {
            Ok(SendResult::PullRequests(Value::Array(open)))
        }
    }
}

/// Draft pull request from the staging branch to the upstream branch,
/// carrying the private pull request's title and body.
pub fn create_request(request: &SendRequest) -> Result<CreatePullRequest, RelayError> {
    let env = &request.env;
    let pull_request = request
        .event_json
        .get("pull_request")
        .ok_or_else(|| RelayError::missing_field("event_json.pull_request"))?;
    let title = pull_request
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::missing_field("event_json.pull_request.title"))?;
    let body = pull_request
        .get("body")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CreatePullRequest {
        base: env.upstream.branch.clone(),
        head: format!("{}:{}", env.staging.owner, env.staging.branch),
        title: title.to_string(),
        body,
        maintainer_can_modify: true,
        draft: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::Repo;

    fn repo(owner: &str, branch: &str) -> Repo {
        Repo {
            owner: owner.to_string(),
            repo: "OpenROAD".to_string(),
            branch: branch.to_string(),
            pr: None,
            sender: None,
        }
    }

    fn request(event_json: Value) -> SendRequest {
        SendRequest {
            event_json,
            env: RelayDetails {
                private: repo("org", "feature"),
                staging: repo("staging-org", "feature"),
                upstream: repo("The-OpenROAD-Project", "master"),
                pr_sha: Some("abc123".to_string()),
            },
        }
    }

    #[test]
    fn test_create_request_from_event() {
        let create = create_request(&request(serde_json::json!({
            "pull_request": {"title": "Fix placement", "body": null}
        })))
        .unwrap();
        assert_eq!(create.base, "master");
        assert_eq!(create.head, "staging-org:feature");
        assert_eq!(create.title, "Fix placement");
        assert!(create.body.is_none());
        assert!(create.draft);
        assert!(create.maintainer_can_modify);
    }

    #[test]
    fn test_create_request_requires_title() {
        let err = create_request(&request(serde_json::json!({"pull_request": {}}))).unwrap_err();
        assert!(matches!(err, RelayError::InvalidPayload(_)));
    }
}
