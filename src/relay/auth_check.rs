//! The "PR Sender Authentication" check on private pull requests.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::Database;
use crate::error::RelayError;
use crate::github::checks::{
    CheckConclusion, CheckRunCreate, CheckRunCreateOutput, CheckRunList, CheckStatus,
};
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::TokenSource;
use crate::pr_info::{PrInfo, PrLinks};

pub const CHECK_NAME: &str = "PR Sender Authentication";
pub const CHECK_EXTERNAL_ID: &str = "pr-auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAction {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub action: CheckAction,
    pub check_run_id: u64,
    pub response: Value,
}

impl CheckOutcome {
    /// Plain-text report returned by the webhook.
    pub fn report(&self) -> String {
        let header = match self.action {
            CheckAction::Created => "Need to *create* this check.".to_string(),
            CheckAction::Updated => {
                format!("Needed to *update* this check with {}.", self.check_run_id)
            }
        };
        let body = serde_json::to_string_pretty(&self.response).unwrap_or_default();
        format!("{}\n{}\n", header, body)
    }
}

/// The completed check reflecting whether `info.user` has stored credentials.
pub fn build_check_run(
    info: &PrInfo,
    links: &PrLinks,
    has_credentials: bool,
    now: DateTime<Utc>,
) -> CheckRunCreate {
    let auth_url = links.auth_url(info);
    let user = &info.user;

    let mut check = CheckRunCreate::new(CHECK_NAME, &info.rev);
    check.external_id = Some(CHECK_EXTERNAL_ID.to_string());
    check.status = Some(CheckStatus::Completed);
    check.started_at = Some(now);
    check.completed_at = Some(now);

    if has_credentials {
        check.conclusion = Some(CheckConclusion::Success);
        check.output = Some(CheckRunCreateOutput {
            title: format!("Credentials found for {}", user),
            summary: format!(
                "The pull request sending robot found authorization for {user}.\n\n\
                 [Double check by having {user} click this link.]({auth_url})\n\n\
                 ([Revoke authorization]({revoke_url}))\n",
                revoke_url = links.revoke_url(info),
            ),
            text: None,
            annotations: Vec::new(),
            images: Vec::new(),
        });
    } else {
        check.conclusion = Some(CheckConclusion::ActionRequired);
        check.details_url = Some(auth_url.clone());
        check.output = Some(CheckRunCreateOutput {
            title: format!("Missing credentials for {}", user),
            summary: format!(
                "The pull request sending robot has not be authorized to send pull requests for {user}.\n\n\
                 [Resolve by having {user} click this link.]({auth_url})\n",
            ),
            text: None,
            annotations: Vec::new(),
            images: Vec::new(),
        });
    }
    check
}

#[derive(Clone)]
pub struct AuthCheck {
    github: GitHubClient,
    tokens: Arc<dyn TokenSource>,
    database: Database,
    links: PrLinks,
    allowed_repos: Vec<String>,
}

impl AuthCheck {
    pub fn new(
        github: GitHubClient,
        tokens: Arc<dyn TokenSource>,
        database: Database,
        links: PrLinks,
        allowed_repos: Vec<String>,
    ) -> Self {
        Self {
            github,
            tokens,
            database,
            links,
            allowed_repos,
        }
    }

    fn is_enabled_for(&self, slug: &str) -> bool {
        self.allowed_repos.is_empty() || self.allowed_repos.iter().any(|r| r == slug)
    }

    /// Create or refresh the check for `info`. Repositories outside the
    /// allow list are skipped and yield `None`.
    pub async fn run(&self, info: &PrInfo) -> Result<Option<CheckOutcome>, RelayError> {
        let slug = info.slug();
        if !self.is_enabled_for(&slug) {
            debug!("Auth check not enabled for {}", slug);
            return Ok(None);
        }

        let auth = Auth::Token(self.tokens.token_for(&slug).await?);
        let listing: Value = self
            .github
            .get_json(
                &format!("/repos/{}/commits/{}/check-runs", slug, info.rev),
                &auth,
                None,
            )
            .await?;
        if listing.get("check_runs").is_none() {
            return Err(RelayError::GitHubError(format!(
                "check run listing for {} has no check_runs: {}",
                info, listing
            )));
        }
        let listing: CheckRunList = serde_json::from_value(listing)?;
        let existing: Vec<u64> = listing
            .check_runs
            .iter()
            .filter(|run| run.external_id.as_deref() == Some(CHECK_EXTERNAL_ID))
            .map(|run| run.id)
            .collect();

        let has_credentials = self.database.latest_token(&info.user).await?.is_some();
        let check = build_check_run(info, &self.links, has_credentials, Utc::now());

        let outcome = match existing.first() {
            None => {
                let response = self
                    .github
                    .send_value(
                        Mode::Post,
                        &format!("/repos/{}/check-runs", slug),
                        &auth,
                        Some(&check),
                        None,
                    )
                    .await?;
                let check_run_id = response.get("id").and_then(Value::as_u64).unwrap_or_default();
                CheckOutcome {
                    action: CheckAction::Created,
                    check_run_id,
                    response,
                }
            }
            Some(&id) => {
                let response = self
                    .github
                    .send_value(
                        Mode::Patch,
                        &format!("/repos/{}/check-runs/{}", slug, id),
                        &auth,
                        Some(&check),
                        None,
                    )
                    .await?;
                CheckOutcome {
                    action: CheckAction::Updated,
                    check_run_id: id,
                    response,
                }
            }
        };

        info!(
            "Auth check {:?} for {} (credentials: {})",
            outcome.action, info, has_credentials
        );
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::StateTokenManager;

    fn links() -> PrLinks {
        PrLinks::new(
            StateTokenManager::new("secret"),
            "https://pr.example",
            "https://a.example",
        )
    }

    fn info() -> PrInfo {
        "mithro:mithro/OpenROAD-1/2@abc123".parse().unwrap()
    }

    #[test]
    fn test_missing_credentials_requires_action() {
        let check = build_check_run(&info(), &links(), false, Utc::now());
        assert_eq!(check.name, CHECK_NAME);
        assert_eq!(check.head_sha, "abc123");
        assert_eq!(check.conclusion, Some(CheckConclusion::ActionRequired));
        let details_url = check.details_url.clone().unwrap();
        assert!(details_url.starts_with("https://pr.example/auth?state="));

        let output = check.output.unwrap();
        assert_eq!(output.title, "Missing credentials for mithro");
        assert!(output.summary.contains(&format!(
            "[Resolve by having mithro click this link.]({})",
            details_url
        )));
    }

    #[test]
    fn test_found_credentials_succeeds() {
        let check = build_check_run(&info(), &links(), true, Utc::now());
        assert_eq!(check.conclusion, Some(CheckConclusion::Success));
        assert!(check.details_url.is_none());
        assert_eq!(check.external_id.as_deref(), Some(CHECK_EXTERNAL_ID));

        let output = check.output.unwrap();
        assert_eq!(output.title, "Credentials found for mithro");
        assert!(output
            .summary
            .contains("([Revoke authorization](https://a.example/revoke?state="));
    }

    #[test]
    fn test_report_text() {
        let outcome = CheckOutcome {
            action: CheckAction::Updated,
            check_run_id: 9,
            response: serde_json::json!({"id": 9}),
        };
        assert!(outcome
            .report()
            .starts_with("Needed to *update* this check with 9.\n"));
    }
}
