//! netmesh CLI for managing full-mesh connectivity networks.
//!
//! Each subcommand maps 1:1 onto a manager operation against the
//! etcd-replicated store and prints a one-line confirmation.

use clap::{Parser, Subcommand};
use netmesh_core::{
    DistributedNetworkStore, HostId, LoggingIntentService, NetworkManager, StoreConfig,
};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "netmesh", version, about = "Manage full-mesh connectivity networks")]
struct Cli {
    /// etcd endpoints, comma-separated
    #[arg(
        long,
        env = "ETCD_ENDPOINTS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    endpoints: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new network
    CreateNetwork { name: String },
    /// Remove a network and withdraw its connectivity intents
    RemoveNetwork { name: String },
    /// Add a host to a network
    AddHost { network: String, host_id: String },
    /// Remove a host from a network
    RemoveHost { network: String, host_id: String },
    /// List all networks
    ListNetworks,
    /// List the hosts in a network
    ListHosts { network: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    config.etcd_endpoints = cli.endpoints;

    let store = Arc::new(DistributedNetworkStore::connect(config).await?);
    let manager = NetworkManager::new(Arc::clone(&store), Arc::new(LoggingIntentService));
    manager.activate();

    let result = run(&manager, cli.command).await;

    manager.deactivate();
    store.shutdown();
    result
}

async fn run(
    manager: &NetworkManager<DistributedNetworkStore>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::CreateNetwork { name } => {
            manager.create_network(&name).await?;
            println!("Created network {name}");
        }
        Command::RemoveNetwork { name } => {
            manager.delete_network(&name).await?;
            println!("Removed network {name}");
        }
        Command::AddHost { network, host_id } => {
            manager.add_host(&network, &HostId::from(host_id.as_str())).await?;
            println!("Added host {host_id} to {network}");
        }
        Command::RemoveHost { network, host_id } => {
            manager
                .remove_host(&network, &HostId::from(host_id.as_str()))
                .await?;
            println!("Removed host {host_id} from {network}");
        }
        Command::ListNetworks => {
            for name in manager.networks().await? {
                println!("{name}");
            }
        }
        Command::ListHosts { network } => {
            for host in manager.hosts(&network).await? {
                println!("{host}");
            }
        }
    }
    Ok(())
}
