use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::broadcast;

use dv_routing::config::SimulationConfig;
use dv_routing::network::Topology;
use dv_routing::router::Router;
use dv_routing::server::RendezvousServer;
use dv_routing::simulation;

#[derive(Parser)]
#[command(name = "dv-routing", about = "Distance-vector routing over a rendezvous server")]
struct Cli {
    /// JSON simulation config; flags given on the command line take precedence
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run only the rendezvous server
    Server {
        #[arg(long)]
        topology: Option<PathBuf>,
        #[arg(long)]
        bind: Option<SocketAddr>,
        #[arg(long)]
        idle_ms: Option<u64>,
    },
    /// Run a single router against a running server
    Router {
        #[arg(long)]
        id: String,
        #[arg(long)]
        server: Option<SocketAddr>,
        #[arg(long)]
        bind: Option<SocketAddr>,
        #[arg(long)]
        connect_timeout_ms: Option<u64>,
    },
    /// Run the server and every configured router in this process
    Simulate {
        #[arg(long)]
        topology: Option<PathBuf>,
        #[arg(long)]
        idle_ms: Option<u64>,
        /// Compare the converged tables with reference shortest paths
        #[arg(long)]
        verify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };

    match cli.command {
        Command::Server { topology, bind, idle_ms } => {
            config.topology = topology.unwrap_or(config.topology);
            config.server.bind_addr = bind.unwrap_or(config.server.bind_addr);
            config.server.idle_timeout_ms = idle_ms.unwrap_or(config.server.idle_timeout_ms);
            run_server(&config).await
        }
        Command::Router { id, server, bind, connect_timeout_ms } => {
            config.router.server_addr = server.unwrap_or(config.router.server_addr);
            config.router.bind_addr = bind.unwrap_or(config.router.bind_addr);
            config.router.connect_timeout_ms = connect_timeout_ms.or(config.router.connect_timeout_ms);
            run_router(id, &config).await
        }
        Command::Simulate { topology, idle_ms, verify } => {
            config.topology = topology.unwrap_or(config.topology);
            config.server.idle_timeout_ms = idle_ms.unwrap_or(config.server.idle_timeout_ms);
            run_simulation(&config, verify).await
        }
    }
}

/// Broadcasts a shutdown on Ctrl-C so units stop cleanly instead of waiting for TERMINATE.
fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = signal_tx.send(());
        }
    });
    tx
}

async fn run_server(config: &SimulationConfig) -> Result<()> {
    let topology = Topology::load(&config.topology)?;
    let server = RendezvousServer::bind(topology, &config.server).await?;
    let shutdown = shutdown_on_ctrl_c();

    let report = server.run(shutdown.subscribe()).await.context("rendezvous server failed")?;
    println!(
        "connection closed: {} routers, {} updates relayed, {} datagrams forwarded",
        report.joined.len(),
        report.relay.updates_relayed,
        report.relay.datagrams_forwarded
    );
    Ok(())
}

async fn run_router(id: String, config: &SimulationConfig) -> Result<()> {
    let router = Router::bind(id.clone(), &config.router).await?;
    let shutdown = shutdown_on_ctrl_c();

    let report = router
        .run(shutdown.subscribe())
        .await
        .with_context(|| format!("router {} failed", id))?;
    println!("{}", report.table);
    Ok(())
}

async fn run_simulation(config: &SimulationConfig, verify: bool) -> Result<()> {
    let topology = Topology::load(&config.topology)?;
    let report = simulation::run(topology.clone(), config).await.context("simulation failed")?;

    for router in report.routers.values() {
        println!("{}", router);
    }

    if verify {
        let mismatches = report.verify(&topology);
        if !mismatches.is_empty() {
            for mismatch in &mismatches {
                error!("{}", mismatch);
            }
            anyhow::bail!("{} routes differ from the shortest paths", mismatches.len());
        }
        info!("All {} routers match the reference shortest paths", report.routers.len());
    }

    Ok(())
}
