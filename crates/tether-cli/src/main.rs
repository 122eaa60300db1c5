//! Tether demo client.
//!
//! Loads the cached server list (or asks the directory for one), connects,
//! logs on, calls a single service method and logs off again. The server
//! list and cell id are saved back to the data directory on exit.

mod session;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::config::{ClientConfig, DirectoryConfig, PersistenceConfig};
use tether_core::{
    CancellationToken, DirectoryResolver, Endpoint, HttpDirectory, ServiceRequest,
    StaticDirectory, TetherClient,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::session::SessionOptions;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Connect to a Tether server and call one service method")]
struct Args {
    /// Server to use instead of the directory (repeatable)
    #[arg(short, long = "server")]
    servers: Vec<Endpoint>,

    /// Directory URL used when no servers are known
    #[arg(long, default_value = DirectoryConfig::DEFAULT_URL)]
    directory_url: String,

    /// Where the server list and cell id are kept
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Account name sent with the log-on
    #[arg(short, long, default_value = "anonymous")]
    username: String,

    /// Service method to call, as Service.Method#Version
    #[arg(long, default_value = "Player.GetGameBadgeLevels#1")]
    service_method: String,

    /// JSON body for the service call
    #[arg(long, default_value = "{}")]
    body: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    // RUST_LOG wins over --debug when set.
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(log_level).init(),
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(PersistenceConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    info!("Starting {} client", ClientConfig::APP_NAME);

    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    info!("Data directory: {}", data_dir.display());

    let body: serde_json::Value =
        serde_json::from_str(&args.body).context("--body is not valid JSON")?;
    let options = SessionOptions {
        username: args.username.clone(),
        request: ServiceRequest::new(args.service_method.clone(), body),
    };

    let directory: Arc<dyn DirectoryResolver> = if args.servers.is_empty() {
        Arc::new(HttpDirectory::with_url(&args.directory_url)?)
    } else {
        Arc::new(StaticDirectory::new(args.servers.iter().copied()))
    };

    let (client, dispatcher) = TetherClient::builder()
        .directory(directory)
        .servers(args.servers.iter().copied())
        .data_dir(&data_dir)
        .build()?;

    match client.bootstrap().await {
        Ok(report) => info!(
            "{} servers known, cell {}",
            client.store().len(),
            report.cell_id
        ),
        Err(e) => {
            error!("Error loading server list from directory: {}", e);
            return Err(e.into());
        }
    }

    let token = CancellationToken::new();
    spawn_shutdown_listener(client.clone(), token.clone());

    let result = session::run_session(&client, dispatcher, &options, &token).await;

    if let Err(e) = client.persist() {
        warn!("Failed to save client state: {}", e);
    }

    let summary = result?;
    if !summary.logged_on {
        warn!("Session ended without logging on");
    } else if summary.response.is_none() {
        warn!("Session ended without a service response");
    }
    if let Some(info) = &summary.disconnect {
        info!(
            "Disconnect was {}",
            if info.user_initiated { "requested" } else { "by the server" }
        );
    }
    info!("Exiting");
    Ok(())
}

/// Log off on Ctrl-C. A second Ctrl-C stops the dispatch loop outright.
fn spawn_shutdown_listener(client: TetherClient, token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Shutdown signal received, logging off");
        if client.log_off().await.is_err() {
            client.disconnect().await;
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}
