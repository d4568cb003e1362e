//! Steps run inside GitHub Actions on the private repository.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_relay::config::{AppConfig, RepoOverrides};
use pr_relay::github::types::PullRequestEvent;
use pr_relay::github::{Auth, GitHubApp, GitHubClient};
use pr_relay::relay::deployments::link_pr;
use pr_relay::relay::labels::remove_label;
use pr_relay::relay::SendRequest;
use pr_relay::repos::{details, RelayDetails, RepoNameResolver};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Event payload written by the Actions runner.
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask the sender service to open the upstream pull request.
    SendPr,
    /// Record the upstream pull request as a deployment of the private one.
    LinkPr,
    /// Remove the label that triggered this run.
    RemoveLabel,
    /// Print the resolved repository triple as KEY=value lines.
    Env,
}

fn load_event(path: Option<PathBuf>) -> anyhow::Result<Value> {
    let path = path.context("Did not find GITHUB_EVENT_PATH environment value.")?;
    if !path.exists() {
        bail!("Path {} was not found.", path.display());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if std::env::var("ACTIONS_STEP_DEBUG").as_deref() == Ok("true") {
        debug!("Event JSON raw:\n{}", raw);
    }
    serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))
}

/// `GITHUB_TOKEN` when present, else an installation token for the
/// repository this run belongs to.
async fn action_auth(config: &AppConfig, github: &GitHubClient) -> anyhow::Result<Auth> {
    if let Some(token) = config.github_token.clone().filter(|t| !t.is_empty()) {
        return Ok(Auth::Token(token));
    }
    let (app_id, key) = config
        .github_app_credentials()?
        .context("Did not find an access token of `GITHUB_TOKEN`")?;
    let slug = std::env::var("GITHUB_REPOSITORY").context("GITHUB_REPOSITORY is not set")?;
    let app = GitHubApp::new(app_id, key, github.clone());
    Ok(Auth::Token(app.installation_token(&slug).await?))
}

async fn resolve(
    event: &Value,
    github: &GitHubClient,
    auth: &Auth,
) -> anyhow::Result<RelayDetails> {
    let overrides = RepoOverrides::from_env()?;
    let resolver = RepoNameResolver::new(github.clone(), auth.clone());
    Ok(details(event, &overrides, &resolver).await?)
}

async fn send_pr(config: &AppConfig, event: Value, env: RelayDetails) -> anyhow::Result<()> {
    if env.private.sender.is_none() {
        bail!("The event does not name a pull request sender");
    }
    let request = SendRequest {
        event_json: event,
        env,
    };
    debug!("Sending JSON data: {}", serde_json::to_string(&request)?);

    let url = format!("{}/send", config.sender_base_url.trim_end_matches('/'));
    let response: Value = reqwest::Client::new()
        .post(&url)
        .json(&request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    debug!("Response JSON data: {}", response);

    let number = response
        .get("number")
        .context("Response did not contain a pull request number")?;
    println!("::set-output name=pr::{}", number);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_relay=debug,relay_action=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;
    let github = GitHubClient::new(&config.github_api_url, config.http_timeout())?;
    let event = load_event(args.event_path)?;
    let auth = action_auth(&config, &github).await?;

    match args.command {
        Command::SendPr => {
            let env = resolve(&event, &github, &auth).await?;
            send_pr(&config, event, env).await?;
        }
        Command::LinkPr => {
            let env = resolve(&event, &github, &auth).await?;
            let result = link_pr(&github, &auth, &env).await?;
            info!(
                "Deployment #{} (created: {}, status created: {})",
                result.deployment.id, result.created_deployment, result.created_status
            );
        }
        Command::RemoveLabel => {
            let event: PullRequestEvent = serde_json::from_value(event)?;
            remove_label(&github, &auth, &event).await?;
        }
        Command::Env => {
            let env = resolve(&event, &github, &auth).await?;
            println!("{}", env.env_lines());
        }
    }
    Ok(())
}
