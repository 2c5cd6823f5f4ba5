//! velum-ingress: the Velum ingress wrapper daemon.
//!
//! Presents a relay-shaped WebSocket endpoint to end-user clients, wraps
//! every submitted event into a nested-encrypted fixed-size envelope for a
//! configured hop path, and publishes the envelope to the server relays.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use velum_relay::RelayPool;

use velum_ingress::config::IngressConfig;
use velum_ingress::path::validate_path;
use velum_ingress::server::Ingress;

/// Default client-facing listen address.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Parser)]
#[command(name = "velum-ingress", about = "Velum ingress wrapper", version)]
struct Args {
    /// Address to listen on for client WebSocket connections.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Comma-separated hop npubs, first hop first.
    #[arg(long, value_delimiter = ',')]
    path: Vec<String>,

    /// Comma-separated relay URLs the wrapped envelopes are published to.
    #[arg(long, value_delimiter = ',')]
    server_relays: Vec<String>,

    /// Optional TOML config file; command-line flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "velum_ingress=debug".
    #[arg(long)]
    verbose: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.verbose {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::from_default_env().add_directive("info".parse()?),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = match &args.config {
        Some(path) => IngressConfig::load(path)?,
        None => IngressConfig::default(),
    };

    let npubs = if args.path.is_empty() { file.path } else { args.path };
    let hops = validate_path(&npubs)?;
    info!(hops = hops.len(), "validated hop path");

    let server_relays = if args.server_relays.is_empty() {
        file.server_relays
    } else {
        args.server_relays
    };
    anyhow::ensure!(
        !server_relays.is_empty(),
        "at least one server relay is required (--server-relays or config file)"
    );
    info!(count = server_relays.len(), relays = ?server_relays, "publishing to server relays");

    let listen_addr = args
        .listen_addr
        .or(file.listen_addr)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "listening for client connections");

    let pool = RelayPool::new(server_relays);
    let ingress = Arc::new(Ingress::new(hops, pool));
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::select! {
        _ = ingress.run(listener, shutdown_tx.subscribe()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(());
        }
    }

    info!("ingress stopped");
    Ok(())
}
