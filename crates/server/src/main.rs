//! Conduit Server
//!
//! Axum server exposing chats, stages and the approval-gated pipeline over
//! JSON routes, with a WebSocket channel for live stage events.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conduit_core::config::{Config, GatewayMode, StoreKind};
use conduit_core::pipeline::{
    AgentGateway, HttpGateway, Notifier, Orchestrator, OrchestratorSettings, SimulatedGateway,
};
use conduit_core::state::{MemoryStore, PipelineDb, PipelineStore};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use api::AppState;

#[derive(Parser, Clone)]
#[command(author, version, about = "Conduit - Approval-gated agent pipeline server")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,

    /// Path to the config file
    #[arg(long, global = true, default_value = Config::DEFAULT_PATH)]
    config: PathBuf,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Conduit server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Persistence backend (sqlite, memory)
        #[arg(long)]
        store: Option<StoreKind>,
        /// Use canned in-process agent replies instead of the agent service
        #[arg(long)]
        simulate: bool,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("conduit_core=info,conduit_server=info,tower_http=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wire store, gateway, notifier and orchestrator from the final config
fn build_state(config: &Config) -> anyhow::Result<AppState> {
    // Storage backend
    let store: Arc<dyn PipelineStore> = match config.store.kind {
        StoreKind::Sqlite => {
            let db = PipelineDb::open_at(&config.store.sqlite_path).with_context(|| {
                format!("Failed to open database at {}", config.store.sqlite_path)
            })?;
            tracing::info!(path = %config.store.sqlite_path, "Using SQLite store");
            Arc::new(db)
        }
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Agent gateway
    let gateway: Arc<dyn AgentGateway> = match config.gateway.mode {
        GatewayMode::Http => {
            tracing::info!(base_url = %config.gateway.base_url, "Using agent service");
            Arc::new(HttpGateway::new(&config.gateway)?)
        }
        GatewayMode::Simulated => {
            tracing::info!("Using simulated agent");
            Arc::new(SimulatedGateway::new())
        }
    };

    // Orchestrator shares the store with the read-only handlers
    let orchestrator = Orchestrator::new(
        store.clone(),
        gateway,
        Notifier::new(config.notifications.capacity),
        OrchestratorSettings::from_config(config),
    );
    Ok(AppState::new(store, orchestrator))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = api::router(state);

    // Bind the listener
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Conduit server running at http://{}", addr);
    tracing::info!("  Chats:  /api/chats");
    tracing::info!("  Stages: /api/stages/:id/messages, /approve, /reject");
    tracing::info!("  Events: /ws (WebSocket)");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn init_config(path: &PathBuf, force: bool) -> anyhow::Result<()> {
    // Refuse to clobber an existing config
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to(path).await?;
    println!("Wrote {}", path.display());
    println!("Run `conduit serve` to start the server");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    match args.command {
        Some(CliCommand::Init { force }) => init_config(&args.config, force).await,
        Some(CliCommand::Serve {
            port,
            host,
            store,
            simulate,
        }) => {
            // Config file, then env, then CLI flags
            let mut config = Config::load_from(&args.config).await?;
            config.apply_env()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(store) = store {
                config.store.kind = store;
            }
            if simulate {
                config.gateway.mode = GatewayMode::Simulated;
            }
            run_server(config).await
        }
        None => {
            let mut config = Config::load_from(&args.config).await?;
            config.apply_env()?;
            run_server(config).await
        }
    }
}
