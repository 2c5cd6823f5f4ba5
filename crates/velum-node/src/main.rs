//! velum-node: the Velum mix node daemon.
//!
//! Subscribes on every configured relay to carrier envelopes addressed to
//! this node, peels one encryption layer per envelope and either forwards a
//! re-wrapped carrier to the next hop or publishes the final plaintext
//! event.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use velum_event::{Keys, SecretKey};
use velum_relay::RelayPool;

use velum_node::config::NodeConfig;
use velum_node::node::MixNode;

#[derive(Debug, Parser)]
#[command(name = "velum-node", about = "Velum mix node", version)]
struct Args {
    /// Private key as 64 hex characters; a fresh key is generated if absent.
    #[arg(long, env = "VELUM_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Comma-separated relay URLs, used for both subscribe and publish.
    #[arg(long, value_delimiter = ',')]
    relays: Vec<String>,

    /// Optional TOML config file; command-line flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "velum_node=debug".
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
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    let relays = if args.relays.is_empty() {
        file.relays
    } else {
        args.relays
    };
    anyhow::ensure!(
        !relays.is_empty(),
        "at least one relay is required (--relays or config file)"
    );

    let keys = match args.private_key.or(file.private_key) {
        Some(hx) => Keys::from_secret(SecretKey::from_hex(&hx)?)?,
        None => {
            info!("no private key configured, generated a fresh one");
            Keys::generate()
        }
    };
    info!(npub = %keys.public_key().to_npub()?, "mix node identity");
    info!(count = relays.len(), relays = ?relays, "using relays");

    let pool = RelayPool::new(relays);
    let node = Arc::new(MixNode::new(keys, pool));
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::select! {
        _ = node.clone().run(shutdown_tx.subscribe()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(());
        }
    }

    info!("mix node stopped");
    Ok(())
}
