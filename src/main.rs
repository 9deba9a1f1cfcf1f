// src/main.rs
// nbcompute - notebook compute session broker

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nbcompute::api::{AppState, create_router};
use nbcompute::config::BrokerConfig;
use nbcompute::gateway::{MockGateway, build_gateway};
use nbcompute::lifecycle::{LifecycleManager, LifecycleSettings};
use nbcompute::mock_server;
use nbcompute::store::Storage;
use nbcompute::tasks::TaskManager;

#[derive(Parser)]
#[command(name = "nbcompute")]
#[command(about = "Session broker for GPU-backed notebook compute")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker API (default)
    Serve {
        /// Overrides API_HOST
        #[arg(long)]
        host: Option<String>,

        /// Overrides API_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the mock upstream provider API
    MockProvider {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(short, long, default_value = "9000")]
        port: u16,
    },
}

fn init_tracing() {
    // RUST_LOG wins; LOG_LEVEL is the simpler knob shared with the .env file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level.to_lowercase())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_broker(mut config: BrokerConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let validation = config.validate();
    if !validation.warnings.is_empty() || !validation.errors.is_empty() {
        warn!("Configuration report:\n{}", validation.report());
    }
    if !validation.is_valid() {
        bail!("invalid configuration");
    }

    let storage = Storage::open(&config.storage).await?;
    let gateway = build_gateway(&config)?;
    let lifecycle = Arc::new(LifecycleManager::new(
        storage,
        gateway,
        LifecycleSettings::from(&config),
    ));

    let mut tasks = TaskManager::new(lifecycle.clone(), config.sweep_interval);
    tasks.start();

    let app = create_router(AppState::new(lifecycle.clone()), &config.allowed_origins);
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!(
        gateway = lifecycle.gateway_name(),
        max_sessions = config.max_sessions,
        "Broker API listening on http://{}",
        bind_address
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tasks.shutdown();
    served?;
    info!("Broker shut down");
    Ok(())
}

async fn run_mock_provider(host: &str, port: u16) -> Result<()> {
    let app = mock_server::router(Arc::new(MockGateway::new()));
    let bind_address = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Mock provider listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        None => run_broker(BrokerConfig::from_env(), None, None).await,
        Some(Commands::Serve { host, port }) => {
            run_broker(BrokerConfig::from_env(), host, port).await
        }
        Some(Commands::MockProvider { host, port }) => run_mock_provider(&host, port).await,
    }
}
