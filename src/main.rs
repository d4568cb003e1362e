use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_relay::config::AppConfig;
use pr_relay::server::{self, Service};

/// Webhook services relaying private pull requests upstream.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Which service to run.
    #[arg(long, env = "RELAY_SERVICE", value_enum)]
    service: Service,

    /// Override the listening port.
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting pr-relay {} service", args.service);

    let mut config = AppConfig::load()?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    info!("Configuration loaded");

    server::serve(args.service, config).await?;
    Ok(())
}
