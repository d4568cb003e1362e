//! Records the upstream pull request as a deployment on the private repository.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::deployment::{
    Deployment, DeploymentCreate, DeploymentState, DeploymentStatus, DeploymentStatusCreate,
    DEPLOYMENT_PREVIEW,
};
use crate::repos::RelayDetails;

pub const ENVIRONMENT_PREFIX: &str = "Upstream PR #";

pub fn environment_name(upstream_pr: u64) -> String {
    format!("{}{}", ENVIRONMENT_PREFIX, upstream_pr)
}

/// Newest deployment per `Upstream PR #` environment.
pub fn latest_by_environment(deployments: Vec<Deployment>) -> BTreeMap<String, Deployment> {
    let mut latest: BTreeMap<String, Deployment> = BTreeMap::new();
    for deployment in deployments {
        let Some(environment) = deployment.environment.clone() else {
            continue;
        };
        if !environment.starts_with(ENVIRONMENT_PREFIX) {
            continue;
        }
        let newer = match latest.get(&environment) {
            Some(current) => updated(&deployment) >= updated(current),
            None => true,
        };
        if newer {
            latest.insert(environment, deployment);
        } else {
            debug!("Skipping {} deployment {}", environment, deployment.id);
        }
    }
    latest
}

fn updated(deployment: &Deployment) -> Option<DateTime<Utc>> {
    deployment.updated_at.or(deployment.created_at)
}

#[derive(Debug, Clone)]
pub struct LinkResult {
    pub deployment: Deployment,
    pub created_deployment: bool,
    pub created_status: bool,
}

/// Make sure the private repository has a deployment for the upstream pull
/// request at the current head, with a status linking to it.
pub async fn link_pr(
    github: &GitHubClient,
    auth: &Auth,
    details: &RelayDetails,
) -> Result<LinkResult, RelayError> {
    let upstream_pr = details
        .upstream
        .pr
        .ok_or_else(|| RelayError::ConfigError("UPSTREAM_PR must be set".to_string()))?;
    let pr_sha = details
        .pr_sha
        .as_deref()
        .ok_or_else(|| RelayError::missing_field("pull_request.head.sha"))?;
    let environment = environment_name(upstream_pr);
    let deployments_path = format!("/repos/{}/deployments", details.private.slug());

    let deployments: Vec<Deployment> = github
        .get_json(&deployments_path, auth, Some(DEPLOYMENT_PREVIEW))
        .await?;
    let latest = latest_by_environment(deployments);

    let (deployment, created_deployment) = match latest.get(&environment) {
        Some(current) if current.sha == pr_sha => (current.clone(), false),
        current => {
            match current {
                Some(current) => info!(
                    "Updating deployment #{} ({} -> {})",
                    current.id, current.sha, pr_sha
                ),
                None => info!("Creating deployment for {}", environment),
            }
            let create = DeploymentCreate {
                ref_field: pr_sha.to_string(),
                task: None,
                auto_merge: Some(false),
                required_contexts: Vec::new(),
                payload: Some(serde_json::json!({})),
                environment: Some(environment.clone()),
                description: Some(String::new()),
                transient_environment: Some(true),
                production_environment: Some(false),
            };
            let created: Deployment = github
                .send_json(
                    Mode::Post,
                    &deployments_path,
                    auth,
                    Some(&create),
                    Some(DEPLOYMENT_PREVIEW),
                )
                .await?;
            (created, true)
        }
    };

    let statuses_path = format!("{}/{}/statuses", deployments_path, deployment.id);
    let statuses: Vec<DeploymentStatus> = github
        .get_json(&statuses_path, auth, Some(DEPLOYMENT_PREVIEW))
        .await?;

    let created_status = statuses.is_empty();
    if created_status {
        let status = DeploymentStatusCreate {
            state: DeploymentState::Success,
            log_url: None,
            description: Some(String::new()),
            environment: Some(environment.clone()),
            environment_url: Some(details.upstream.pr_url()?),
            auto_inactive: Some(false),
        };
        let _: DeploymentStatus = github
            .send_json(
                Mode::Post,
                &statuses_path,
                auth,
                Some(&status),
                Some(DEPLOYMENT_PREVIEW),
            )
            .await?;
        info!("Marked deployment #{} as {}", deployment.id, environment);
    }

    Ok(LinkResult {
        deployment,
        created_deployment,
        created_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(id: u64, environment: &str, sha: &str, updated_at: &str) -> Deployment {
        serde_json::from_value(serde_json::json!({
            "url": format!("https://api.github.com/repos/o/r/deployments/{}", id),
            "id": id,
            "node_id": "x",
            "sha": sha,
            "ref": sha,
            "environment": environment,
            "updated_at": updated_at,
        }))
        .unwrap()
    }

    #[test]
    fn test_latest_by_environment_keeps_newest() {
        let latest = latest_by_environment(vec![
            deployment(1, "Upstream PR #5", "old", "2021-05-01T00:00:00Z"),
            deployment(2, "Upstream PR #5", "new", "2021-05-03T00:00:00Z"),
            deployment(3, "Upstream PR #5", "stale", "2021-05-02T00:00:00Z"),
            deployment(4, "production", "x", "2021-05-04T00:00:00Z"),
        ]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["Upstream PR #5"].id, 2);
    }

    #[test]
    fn test_environment_name() {
        assert_eq!(environment_name(42), "Upstream PR #42");
    }
}
