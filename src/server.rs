use axum::{routing::get, Json, Router};
use clap::ValueEnum;
use std::fmt;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::crypto::StateTokenManager;
use crate::database::Database;
use crate::error::RelayError;
use crate::github::{GitHubApp, GitHubClient, StaticToken, TokenSource};
use crate::installations::{
    AppInstallations, InstallationCache, InstallationSource, StaticInstallations,
};
use crate::oauth::OAuthClient;
use crate::pr_info::PrLinks;
use crate::relay::{AuthCheck, PrSender, WorkflowDispatcher};
use crate::webhooks;

/// The three deployable services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Service {
    /// Posts the sender-authentication check on private pull requests.
    AuthCheck,
    /// OAuth endpoints and upstream pull request creation.
    Sender,
    /// Workflow-dispatch fan-out on upstream pushes.
    UpstreamSync,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::AuthCheck => "auth-check",
            Service::Sender => "sender",
            Service::UpstreamSync => "upstream-sync",
        };
        f.write_str(name)
    }
}

/// Everything a request handler needs, shared across tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub database: Database,
    pub links: PrLinks,
    pub github: GitHubClient,
    pub oauth: OAuthClient,
    pub auth_check: AuthCheck,
    pub sender: PrSender,
    pub dispatcher: WorkflowDispatcher,
    pub installations: Arc<InstallationCache>,
}

impl AppState {
    /// Wire the components together from explicit parts.
    pub fn build(
        config: AppConfig,
        database: Database,
        tokens: Arc<dyn TokenSource>,
        installations: Arc<dyn InstallationSource>,
    ) -> Result<Self, RelayError> {
        let github = GitHubClient::new(&config.github_api_url, config.http_timeout())?;
        let links = PrLinks::new(
            StateTokenManager::new(&config.client_token),
            &config.sender_base_url,
            &config.auth_check_base_url,
        );
        let oauth = OAuthClient::new(
            &config.client_id,
            &config.client_secret,
            &config.github_web_url,
            &config.sender_base_url,
            github.clone(),
            database.clone(),
        )?;
        let auth_check = AuthCheck::new(
            github.clone(),
            tokens.clone(),
            database.clone(),
            links.clone(),
            config.auth_check_repos(),
        );
        let sender = PrSender::new(github.clone(), oauth.clone(), database.clone());
        let dispatcher = WorkflowDispatcher::new(github.clone(), tokens, &config.dispatch_workflow);
        let installations = Arc::new(InstallationCache::new(
            installations,
            config.installation_refresh_interval(),
            config.installation_max_wait(),
        ));

        Ok(Self {
            config: Arc::new(config),
            database,
            links,
            github,
            oauth,
            auth_check,
            sender,
            dispatcher,
            installations,
        })
    }

    /// Connect to the database and pick credentials from the configuration:
    /// the GitHub App when configured, otherwise `GITHUB_TOKEN` and the
    /// static dispatch target list.
    pub async fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let database = Database::new(&config.database_url).await?;
        database.run_migrations().await?;

        let github = GitHubClient::new(&config.github_api_url, config.http_timeout())?;
        let (tokens, installations): (Arc<dyn TokenSource>, Arc<dyn InstallationSource>) =
            match config.github_app_credentials()? {
                Some((app_id, key)) => {
                    info!("Authenticating as GitHub App {}", app_id);
                    let source = AppInstallations::new(&config.github_api_url, app_id, &key)?;
                    (
                        Arc::new(GitHubApp::new(app_id, key, github)),
                        Arc::new(source),
                    )
                }
                None => {
                    let token = config.github_token.clone().ok_or_else(|| {
                        RelayError::ConfigError(
                            "Set GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH, or GITHUB_TOKEN"
                                .to_string(),
                        )
                    })?;
                    info!("Authenticating with a static token");
                    (
                        Arc::new(StaticToken(token)),
                        Arc::new(StaticInstallations(config.dispatch_targets())),
                    )
                }
            };

        Self::build(config, database, tokens, installations)
    }
}

/// Router for `service`, including `/health` and `/localhost/*path`.
pub fn router(service: Service, state: AppState) -> Router {
    let routes = match service {
        Service::AuthCheck => webhooks::auth_check::routes(),
        Service::Sender => webhooks::sender::routes(),
        Service::UpstreamSync => webhooks::upstream_sync::routes(),
    };

    routes
        .route("/health", get(move || health_check(service)))
        .route("/localhost/*path", get(webhooks::localhost_redirect))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check(service: Service) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": service.to_string(),
        "timestamp": chrono::Utc::now()
    }))
}

/// Check the settings `service` cannot run without.
pub fn validate_config(service: Service, config: &AppConfig) -> Result<(), RelayError> {
    match service {
        Service::AuthCheck => config.require_state_secret(),
        Service::Sender => {
            config.require_state_secret()?;
            config.require_oauth()
        }
        Service::UpstreamSync => Ok(()),
    }
}

pub async fn serve(service: Service, config: AppConfig) -> Result<(), RelayError> {
    validate_config(service, &config)?;
    let addr = config.bind_address()?;
    let state = AppState::from_config(config).await?;
    let app = router(service, state);

    info!("{} service listening on {}", service, addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::ConfigError(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::ConfigError(format!("Server error: {}", e)))?;
    Ok(())
}
