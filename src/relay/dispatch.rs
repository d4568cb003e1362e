//! Workflow-dispatch fan-out to every account that installed the App.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::github::client::{Auth, GitHubClient, Mode};
use crate::github::TokenSource;

pub const HEAD_REF: &str = "refs/heads/";

/// Branches whose pushes fan out.
pub const TRACKED_BRANCHES: &[&str] = &["master", "main"];

pub fn branch_from_ref(git_ref: &str) -> Result<&str, RelayError> {
    git_ref.strip_prefix(HEAD_REF).ok_or_else(|| {
        RelayError::InvalidPayload(format!("ref {:?} does not start with {:?}", git_ref, HEAD_REF))
    })
}

pub fn is_tracked_branch(branch: &str) -> bool {
    TRACKED_BRANCHES.contains(&branch)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched {
        response: Value,
    },
    Failed {
        message: String,
        owner: String,
        repo: String,
        branch: String,
        detail: String,
    },
}

#[derive(Clone)]
pub struct WorkflowDispatcher {
    github: GitHubClient,
    tokens: Arc<dyn TokenSource>,
    workflow: String,
}

impl WorkflowDispatcher {
    pub fn new(github: GitHubClient, tokens: Arc<dyn TokenSource>, workflow: &str) -> Self {
        Self {
            github,
            tokens,
            workflow: workflow.to_string(),
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Ask `owner/repo` to run the sync workflow on `branch`.
    pub async fn trigger(&self, owner: &str, repo: &str, branch: &str) -> Result<Value, RelayError> {
        let slug = format!("{}/{}", owner, repo);
        let auth = Auth::Token(self.tokens.token_for(&slug).await?);
        self.github
            .send_value(
                Mode::Post,
                &format!(
                    "/repos/{}/actions/workflows/{}/dispatches",
                    slug, self.workflow
                ),
                &auth,
                Some(&serde_json::json!({ "ref": branch })),
                None,
            )
            .await
    }

    /// Trigger every target in turn. A failing target is recorded and the
    /// rest still run.
    pub async fn trigger_all(
        &self,
        targets: &[String],
        repo: &str,
        branch: &str,
    ) -> BTreeMap<String, DispatchOutcome> {
        let mut results = BTreeMap::new();
        for owner in targets {
            let outcome = match self.trigger(owner, repo, branch).await {
                Ok(response) => {
                    info!("Dispatched {} on {}/{}@{}", self.workflow, owner, repo, branch);
                    DispatchOutcome::Dispatched { response }
                }
                Err(e) => {
                    warn!("Dispatch to {}/{} failed: {}", owner, repo, e);
                    DispatchOutcome::Failed {
                        message: e.to_string(),
                        owner: owner.clone(),
                        repo: repo.to_string(),
                        branch: branch.to_string(),
                        detail: format!("{:?}", e),
                    }
                }
            };
            results.insert(owner.clone(), outcome);
        }
        results
    }
}

/// Pretty JSON with object keys sorted at every level.
pub fn pretty_sorted<T: Serialize + ?Sized>(value: &T) -> Result<String, RelayError> {
    let value = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_string_pretty(&value)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
