//! Runs a rendezvous server and one router per configured id inside a single
//! runtime, then checks the stabilized tables against reference shortest paths.

use log::{error, info};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::algorithms::dijkstra;
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::network::Topology;
use crate::protocol::Cost;
use crate::router::{Router, RouterReport};
use crate::server::{RendezvousServer, ServerReport};
use crate::RouterId;

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub server: ServerReport,
    pub routers: BTreeMap<RouterId, RouterReport>,
}

/// A stabilized cost that disagrees with the reference shortest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub router: RouterId,
    pub destination: RouterId,
    pub expected: Cost,
    pub actual: Cost,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: converged to {}, shortest path is {}",
            self.router, self.destination, self.actual, self.expected
        )
    }
}

impl SimulationReport {
    pub fn verify(&self, topology: &Topology) -> Vec<Mismatch> {
        let reference = dijkstra::all_pairs(topology);
        let mut mismatches = Vec::new();

        for (router, expected_costs) in &reference {
            let Some(report) = self.routers.get(router) else {
                continue;
            };
            for (destination, expected) in expected_costs {
                let actual = report.table.cost(destination);
                if actual != *expected {
                    mismatches.push(Mismatch {
                        router: router.clone(),
                        destination: destination.clone(),
                        expected: *expected,
                        actual,
                    });
                }
            }
        }

        mismatches
    }
}

pub async fn run(topology: Topology, config: &SimulationConfig) -> Result<SimulationReport> {
    let server = RendezvousServer::bind(topology.clone(), &config.server).await?;
    let mut router_config = config.router.clone();
    router_config.server_addr = reachable(server.local_addr()?);

    let (shutdown_tx, _) = broadcast::channel(1);

    let server_task = spawn_unit(&shutdown_tx, server.run(shutdown_tx.subscribe()));

    let mut router_tasks = Vec::with_capacity(topology.len());
    for router_id in topology.router_ids() {
        let router = match Router::bind(router_id.clone(), &router_config).await {
            Ok(router) => router,
            Err(e) => {
                let _ = shutdown_tx.send(());
                return Err(e);
            }
        };
        let task = spawn_unit(&shutdown_tx, router.run(shutdown_tx.subscribe()));
        router_tasks.push((router_id.clone(), task));
    }
    info!("Started {} routers against {}", router_tasks.len(), router_config.server_addr);

    let mut first_error = None;

    let server_report = match join_unit("server", server_task).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("Server failed: {}", e);
            first_error = first_error.or(Some(e));
            None
        }
    };

    let mut routers = BTreeMap::new();
    for (router_id, task) in router_tasks {
        match join_unit(&router_id, task).await {
            Ok(report) => {
                routers.insert(router_id, report);
            }
            Err(e) => {
                error!("Router {} failed: {}", router_id, e);
                first_error = first_error.or(Some(e));
            }
        }
    }

    match (first_error, server_report) {
        (None, Some(server)) => Ok(SimulationReport { server, routers }),
        (Some(e), _) => Err(e),
        (None, None) => Err(Error::Task {
            unit: "server".into(),
            detail: "no report".into(),
        }),
    }
}

/// Spawns a unit; if it fails, everyone else is told to shut down, since the
/// server can no longer reach TERMINATE and routers would otherwise wait forever.
fn spawn_unit<T, F>(shutdown: &broadcast::Sender<()>, unit: F) -> JoinHandle<Result<T>>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = unit.await;
        if result.is_err() {
            let _ = shutdown.send(());
        }
        result
    })
}

async fn join_unit<T>(unit: &str, task: JoinHandle<Result<T>>) -> Result<T> {
    task.await.map_err(|e| Error::Task {
        unit: unit.to_string(),
        detail: e.to_string(),
    })?
}

/// A server bound to the unspecified address is reached over loopback.
fn reachable(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}
