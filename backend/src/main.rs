//! Chromedash gateway server.

use anyhow::Context;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_sessions::MemoryStore;
use tracing::info;

use chromedash::{
    auth::SessionCookieResolver,
    config::Config,
    create_app_with_config,
    gateway::Gateway,
    logging,
    state::{AppState, GatewayOptions},
    tools::ToolRegistry,
    workspace::WorkspaceClient,
};

/// Chromedash - stateful MCP gateway for Chrome Enterprise administration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CHROMEDASH_PORT")]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long, env = "CHROMEDASH_BIND")]
    bind: Option<IpAddr>,

    /// Workspace customer id used for Directory and Chrome Policy calls
    #[arg(long, env = "CHROMEDASH_CUSTOMER_ID")]
    customer_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.port, args.bind, args.customer_id)?;
    let _log_guard = logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;
    info!("Configuration loaded");

    let client = WorkspaceClient::new(config.workspace.clone())
        .context("Failed to create Workspace API client")?;
    let tools = Arc::new(ToolRegistry::workspace(client));
    info!("Registered {} tools", tools.len());

    let gateway = Gateway::new(tools, config.session_ttl);
    let session_store = MemoryStore::default();
    let resolver = Arc::new(SessionCookieResolver::new(session_store.clone()));
    let options = GatewayOptions {
        keep_alive: config.keep_alive,
        allowed_origins: config.allowed_origins.clone(),
    };
    let state = AppState::new(gateway.clone(), resolver, options);

    let app = create_app_with_config(state, session_store, config.allowed_origins.clone());

    let addr = SocketAddr::new(config.bind, config.port);
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let sweeper = gateway.sweeper().clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");

        // Ending the SSE streams lets the server drain
        sweeper.close_all();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down");

    Ok(())
}
