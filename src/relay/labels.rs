use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::types::{Label, PullRequestEvent};

/// Remove the label that triggered `event` from its pull request. Returns
/// the labels left on the pull request.
pub async fn remove_label(
    github: &GitHubClient,
    auth: &Auth,
    event: &PullRequestEvent,
) -> Result<Vec<Label>, RelayError> {
    let repository = event
        .repository
        .as_ref()
        .ok_or_else(|| RelayError::missing_field("repository"))?;
    let label = event
        .label
        .as_ref()
        .ok_or_else(|| RelayError::missing_field("label"))?;

    let mut url = Url::parse(&github.url(&format!(
        "/repos/{}/issues/{}/labels",
        repository.full_name, event.pull_request.number
    )))
    .map_err(|e| RelayError::InvalidRequest(format!("invalid label URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| RelayError::InvalidRequest("API base cannot hold a path".to_string()))?
        .push(&label.name);

    let response = github
        .send_value::<Value>(Mode::Delete, url.as_str(), auth, None, None)
        .await?;

    match response {
        Value::Array(_) => {
            info!("Removed {}.", label.name);
            Ok(serde_json::from_value(response)?)
        }
        other => {
            warn!("Failed to remove {}.", label.name);
            Err(RelayError::GitHubError(format!(
                "removing label {} returned {}",
                label.name, other
            )))
        }
    }
}
