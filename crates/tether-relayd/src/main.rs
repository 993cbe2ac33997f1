//! `tether-relayd`: run a reference relay node.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tether_types::config::{load_relay_config, RelayConfig};
use tether_types::identity::{Identity, DEFAULT_LEDGER_ID};
use tether_wire::RelayNode;
use tracing::info;

#[derive(Parser)]
#[command(name = "tether-relayd", version, about = "Tether reference relay node")]
struct Cli {
    /// Path to config file (default: ~/.tether/relay.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay (default).
    Run {
        /// Override the listen address.
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Additional relay to peer with; may be repeated.
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
    },
    /// Print a fresh relay key pair for `private_key_hex`.
    Keygen,
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".tether")
        .join("relay.toml")
}

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(config: &mut RelayConfig, listen: Option<SocketAddr>, peers: Vec<SocketAddr>) {
    if let Some(addr) = listen {
        config.listen_addr = addr;
    }
    for peer in peers {
        if !config.entry_peers.contains(&peer) {
            config.entry_peers.push(peer);
        }
    }
}

async fn run(mut config: RelayConfig, listen: Option<SocketAddr>, peers: Vec<SocketAddr>) -> anyhow::Result<()> {
    apply_overrides(&mut config, listen, peers);
    let (node, accept) = RelayNode::start(config)
        .await
        .context("failed to start relay")?;
    println!("listening: {}", node.local_addr());
    println!("public_key: {}", node.public_key_hex());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("relay: received ctrl-c");
    node.shutdown();
    accept.await.context("accept loop panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    match cli.command.unwrap_or(Commands::Run {
        listen: None,
        peers: Vec::new(),
    }) {
        Commands::Keygen => {
            let identity = Identity::generate(DEFAULT_LEDGER_ID);
            println!("private_key_hex = \"{}\"", identity.secret_key_hex());
            println!("# public_key = {}", identity.public_key_hex());
            Ok(())
        }
        Commands::Run { listen, peers } => {
            let path = cli.config.unwrap_or_else(default_config_path);
            run(load_relay_config(&path), listen, peers).await
        }
    }
}
