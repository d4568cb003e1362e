#![allow(dead_code)]

use pr_relay::config::AppConfig;
use pr_relay::database::models::NewToken;
use pr_relay::database::Database;
use pr_relay::github::StaticToken;
use pr_relay::installations::StaticInstallations;
use pr_relay::pr_info::PrInfo;
use pr_relay::server::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::MockServer;

pub const STATE_SECRET: &str = "test-state-secret";
pub const INSTALLATION_TOKEN: &str = "ghs_installation";

/// Services wired against `github`, which stands in for both the API and
/// the OAuth host. `extra` settings override the defaults.
pub async fn test_state(github: &MockServer, extra: &[(&str, &str)]) -> AppState {
    test_state_with_targets(github, extra, Vec::new()).await
}

pub async fn test_state_with_targets(
    github: &MockServer,
    extra: &[(&str, &str)],
    targets: Vec<String>,
) -> AppState {
    let uri = github.uri();
    let mut pairs = vec![
        ("github_api_url", uri.as_str()),
        ("github_web_url", uri.as_str()),
        ("client_id", "Iv1.client"),
        ("client_secret", "client-secret"),
        ("client_token", STATE_SECRET),
        ("sender_base_url", "https://pr.example"),
        ("auth_check_base_url", "https://a.example"),
        ("dispatch_workflow", "sync.yml"),
        ("http_timeout_secs", "5"),
        ("installation_wait_secs", "1"),
    ];
    pairs.extend_from_slice(extra);

    let config = AppConfig::from_pairs(pairs).unwrap();
    let database = Database::new_in_memory().await.unwrap();
    AppState::build(
        config,
        database,
        Arc::new(StaticToken(INSTALLATION_TOKEN.to_string())),
        Arc::new(StaticInstallations(targets)),
    )
    .unwrap()
}

pub fn pr_info() -> PrInfo {
    "mithro:mithro/OpenROAD-1/2@abc123".parse().unwrap()
}

pub async fn store_token(database: &Database, login: &str) {
    database
        .insert_token(&NewToken {
            login: login.to_string(),
            access_token: "ghu_stored".to_string(),
            expires_in: 28800,
            refresh_token: "ghr_stored".to_string(),
            refresh_token_expires_in: 15897600,
            token_type: "bearer".to_string(),
        })
        .await
        .unwrap();
}

/// Form-encoded body of a successful token endpoint response.
pub fn token_response(access_token: &str) -> String {
    format!(
        "access_token={}&expires_in=28800&refresh_token=ghr_new&refresh_token_expires_in=15897600&scope=&token_type=bearer",
        access_token
    )
}

fn repository(owner: &str, name: &str) -> Value {
    json!({
        "name": name,
        "full_name": format!("{}/{}", owner, name),
        "owner": {"login": owner}
    })
}

/// A `pull_request` webhook from `mithro/OpenROAD-1`.
pub fn pull_request_event() -> Value {
    json!({
        "action": "synchronize",
        "pull_request": {
            "number": 2,
            "title": "Fix placement",
            "body": "Moves the cells.",
            "state": "open",
            "user": {"login": "mithro"},
            "head": {"sha": "abc123", "ref": "feature", "repo": repository("mithro", "OpenROAD-1")},
            "base": {"sha": "def456", "ref": "master", "repo": repository("mithro", "OpenROAD-1")}
        },
        "repository": repository("mithro", "OpenROAD-1")
    })
}

/// A labeled pull request in a private fork of OpenROAD.
pub fn private_pull_request_event(label: &str) -> Value {
    json!({
        "action": "labeled",
        "label": {"name": label},
        "pull_request": {
            "number": 12,
            "title": "Fix placement",
            "body": "Moves the cells.",
            "state": "open",
            "user": {"login": "mithro"},
            "head": {"sha": "abc123", "ref": "feature", "repo": repository("org", "OpenROAD-private")},
            "base": {"sha": "def456", "ref": "master", "repo": repository("org", "OpenROAD-private")}
        },
        "repository": repository("org", "OpenROAD-private")
    })
}

pub fn push_event(repo: &str, git_ref: &str) -> Value {
    json!({
        "ref": git_ref,
        "repository": repository("The-OpenROAD-Project", repo),
        "sender": {"login": "maliberty"}
    })
}

pub fn check_run(id: u64, external_id: &str) -> Value {
    json!({
        "id": id,
        "node_id": "CR_1",
        "name": "PR Sender Authentication",
        "head_sha": "abc123",
        "details_url": null,
        "external_id": external_id,
        "url": format!("https://api.github.com/repos/mithro/OpenROAD-1/check-runs/{}", id),
        "html_url": null,
        "check_suite": null,
        "status": "completed",
        "started_at": null,
        "completed_at": null,
        "conclusion": "success"
    })
}

pub fn deployment(id: u64, environment: &str, sha: &str) -> Value {
    json!({
        "url": format!("https://api.github.com/repos/org/OpenROAD-private/deployments/{}", id),
        "id": id,
        "node_id": "DE_1",
        "sha": sha,
        "ref": sha,
        "task": "deploy",
        "payload": {},
        "original_environment": environment,
        "environment": environment,
        "description": "",
        "created_at": "2021-03-01T00:00:00Z",
        "updated_at": "2021-03-01T00:00:00Z",
        "statuses_url": null,
        "repository_url": null,
        "creator": null,
        "transient_environment": true,
        "production_environment": false
    })
}

pub fn deployment_status(id: u64, environment: &str) -> Value {
    json!({
        "id": id,
        "node_id": "DES_1",
        "state": "success",
        "creator": null,
        "description": "",
        "environment": environment,
        "created_at": "2021-03-01T00:00:00Z",
        "updated_at": "2021-03-01T00:00:00Z",
        "target_url": "",
        "environment_url": "https://github.com/The-OpenROAD-Project/OpenROAD/pull/7",
        "log_url": ""
    })
}
