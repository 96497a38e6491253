//! MCP Remote Auth - OAuth 2.0 authorization server proxy

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::get};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::Parser;
use rand::Rng;
use tracing::{error, info};

use mcp_remote_auth::{
    cli::{Cli, Command, StoreCommand},
    config::Config,
    gateway::{ProxyServer, whoami},
    oauth::{HttpUpstreamClient, OAuthProxyProvider, ProviderSettings},
    setup_tracing,
    store::TokenStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // A local .env is optional
    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "Loaded .env");
    }

    match cli.command {
        Some(Command::Store(ref cmd)) => run_store_command(&cli, cmd),
        Some(Command::GenerateSecret) => {
            let bytes: [u8; 32] = rand::rng().random();
            println!("{}", URL_SAFE_NO_PAD.encode(bytes));
            ExitCode::SUCCESS
        }
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load and validate configuration, applying CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<TokenStore> {
    if config.storage.secret.is_empty() {
        anyhow::bail!("storage.secret is required");
    }
    TokenStore::open(&config.storage.data_dir, &config.storage.secret).with_context(|| {
        format!(
            "Failed to open token store in {}",
            config.storage.data_dir.display()
        )
    })
}

fn run_store_command(cli: &Cli, cmd: &StoreCommand) -> ExitCode {
    match store_command(cli, cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn store_command(cli: &Cli, cmd: &StoreCommand) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;

    match cmd {
        StoreCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
        StoreCommand::LatestToken => {
            let (token, record) = store
                .latest_access_token()
                .context("No live access token in store")?;
            println!("{token}");
            eprintln!(
                "client_id={} identity={} expires_at={}",
                record.client_id,
                record.identity.as_deref().unwrap_or("-"),
                chrono::DateTime::from_timestamp(i64::try_from(record.expires_at)?, 0)
                    .map_or_else(|| record.expires_at.to_string(), |t| t.to_rfc3339())
            );
        }
        StoreCommand::PurgeExpired => {
            let purged = store.purge_expired()?;
            println!("Purged {purged} expired record(s)");
        }
    }
    Ok(())
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let store = match open_store(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let upstream = match HttpUpstreamClient::new(&config.upstream) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create upstream client: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        provider = %config.upstream.provider_name,
        callback = %config.callback_url(),
        "Starting MCP Remote Auth"
    );

    let provider = Arc::new(OAuthProxyProvider::new(
        store,
        ProviderSettings::from_config(&config),
        upstream,
    ));
    let protected = Router::new().route("/whoami", get(whoami));

    if let Err(e) = ProxyServer::new(config, provider, protected).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
