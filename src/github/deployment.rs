//! Deployment and deployment status payloads.
//!
//! <https://docs.github.com/en/rest/deployments>

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Preview media type the deployment endpoints were published under.
pub const DEPLOYMENT_PREVIEW: &str = "ant-man-preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Error,
    Failure,
    Inactive,
    InProgress,
    Queued,
    Pending,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub id: u64,
    pub node_id: String,
    pub state: DeploymentState,
    pub creator: Option<serde_json::Value>,
    pub description: Option<String>,
    pub environment: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub target_url: Option<String>,
    pub environment_url: Option<String>,
    pub log_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub url: String,
    pub id: u64,
    pub node_id: String,
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_field: Option<String>,
    pub task: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub original_environment: Option<String>,
    pub environment: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub statuses_url: Option<String>,
    pub repository_url: Option<String>,
    pub creator: Option<serde_json::Value>,
    pub transient_environment: Option<bool>,
    pub production_environment: Option<bool>,
}

/// Body of `POST /repos/{owner}/{repo}/deployments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCreate {
    #[serde(rename = "ref")]
    pub ref_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_merge: Option<bool>,
    pub required_contexts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient_environment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_environment: Option<bool>,
}

/// Body of `POST /repos/{owner}/{repo}/deployments/{id}/statuses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatusCreate {
    pub state: DeploymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_inactive: Option<bool>,
}
