use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::config::RouterConfig;
use crate::error::{Error, Phase, Result};
use crate::network::transport::{self, RECV_BUFFER_SIZE};
use crate::protocol::{ProtocolMessage, RoutingTable};
use crate::{shutdown_signalled, RouterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouterState {
    Connecting,
    Converging,
    /// TERMINATE received; the table is final.
    Terminated,
    /// Stopped from outside before TERMINATE arrived.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RouterStatus {
    pub state: RouterState,
    pub table: Option<RoutingTable>,
}

/// Read-only view of a running router, usable from any task.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    router_id: RouterId,
    status: watch::Receiver<RouterStatus>,
}

impl RouterHandle {
    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    pub fn state(&self) -> RouterState {
        self.status.borrow().state
    }

    /// Current vector and next hops; `None` until RESPONSE has been processed.
    pub fn table(&self) -> Option<RoutingTable> {
        self.status.borrow().table.clone()
    }

    /// Waits until the router reaches TERMINATED and returns its final table.
    ///
    /// Returns `None` if the router stopped any other way.
    pub async fn stabilized(&self) -> Option<RoutingTable> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| matches!(s.state, RouterState::Terminated | RouterState::Stopped))
            .await
            .ok()?;

        match settled.state {
            RouterState::Terminated => settled.table.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Terminated,
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterReport {
    pub router_id: RouterId,
    pub table: RoutingTable,
    pub outcome: Outcome,
    pub updates_received: u64,
    pub updates_sent: u64,
    pub improving_rounds: u64,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for RouterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  [{:?}, {} updates in, {} out]",
            self.table, self.outcome, self.updates_received, self.updates_sent
        )
    }
}

pub struct Router {
    id: RouterId,
    server_addr: SocketAddr,
    connect_timeout: Option<Duration>,
    socket: UdpSocket,
    status: watch::Sender<RouterStatus>,
}

impl Router {
    pub async fn bind(id: impl Into<RouterId>, config: &RouterConfig) -> Result<Self> {
        let socket = transport::bind(config.bind_addr, Phase::RouterConnecting).await?;
        let (status, _) = watch::channel(RouterStatus {
            state: RouterState::Connecting,
            table: None,
        });

        Ok(Self {
            id: id.into(),
            server_addr: config.server_addr,
            connect_timeout: config.connect_timeout(),
            socket,
            status,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|source| Error::Transport {
            phase: Phase::RouterConnecting,
            operation: "local_addr",
            source,
        })
    }

    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            router_id: self.id.clone(),
            status: self.status.subscribe(),
        }
    }

    /// Joins, converges, and returns the final table once TERMINATE (or `shutdown`) arrives.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<RouterReport> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        let table = self.connect(&mut buffer, &mut shutdown).await?;
        self.converge(table, &mut buffer, &mut shutdown).await
    }

    async fn connect(&self, buffer: &mut [u8], shutdown: &mut broadcast::Receiver<()>) -> Result<RoutingTable> {
        const PHASE: Phase = Phase::RouterConnecting;

        let join = ProtocolMessage::Join {
            router_id: self.id.clone(),
        };
        transport::send_message(&self.socket, &join, self.server_addr, PHASE).await?;
        info!("Router {} sent JOIN to {}", self.id, self.server_addr);

        let started = Instant::now();
        let deadline = self.connect_timeout.map(|timeout| started + timeout);

        let (reply, from) = tokio::select! {
            result = transport::recv_message(&self.socket, buffer, PHASE) => result?,
            _ = shutdown_signalled(shutdown) => return Err(Error::Cancelled { phase: PHASE }),
            _ = sleep_until(deadline) => {
                return Err(Error::Timeout { phase: PHASE, waited_ms: started.elapsed().as_millis() });
            }
        };

        let initial = match reply {
            ProtocolMessage::Response { router_id, table } if router_id == self.id => table,
            ProtocolMessage::Response { router_id, .. } => {
                return Err(Error::Protocol {
                    phase: PHASE,
                    detail: format!("RESPONSE from {} is addressed to {}, not {}", from, router_id, self.id),
                });
            }
            other => {
                return Err(Error::Protocol {
                    phase: PHASE,
                    detail: format!("expected RESPONSE after JOIN, got {} from {}", other.kind(), from),
                });
            }
        };

        let table = RoutingTable::from_initial(self.id.clone(), initial);
        info!("Router {} initial vector: {}", self.id, table);
        Ok(table)
    }

    async fn converge(
        &self,
        mut table: RoutingTable,
        buffer: &mut [u8],
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<RouterReport> {
        const PHASE: Phase = Phase::RouterConverging;

        let mut updates_received = 0u64;
        let mut updates_sent = 0u64;
        let mut improving_rounds = 0u64;

        self.publish(RouterState::Converging, &table);

        // Announce once even without improvements so isolated routers are still heard.
        self.announce(&table).await?;
        updates_sent += 1;

        let outcome = loop {
            let (message, from) = tokio::select! {
                result = transport::recv_message(&self.socket, buffer, PHASE) => result?,
                _ = shutdown_signalled(shutdown) => break Outcome::Shutdown,
            };

            match message {
                ProtocolMessage::Terminate => break Outcome::Terminated,
                ProtocolMessage::Update {
                    router_id: neighbor,
                    table: reported,
                } => {
                    updates_received += 1;

                    let changed = table.relax(&neighbor, &reported);
                    if changed.is_empty() {
                        continue;
                    }

                    improving_rounds += 1;
                    debug!("Router {} improved {:?} via {}: {}", self.id, changed, neighbor, table);
                    self.publish(RouterState::Converging, &table);
                    self.announce(&table).await?;
                    updates_sent += 1;
                }
                other => {
                    warn!("Router {} discarding {} from {} while converging", self.id, other.kind(), from);
                }
            }
        };

        let state = match outcome {
            Outcome::Terminated => RouterState::Terminated,
            Outcome::Shutdown => RouterState::Stopped,
        };
        self.publish(state, &table);
        info!("Router {} table finalized ({:?}): {}", self.id, outcome, table);

        Ok(RouterReport {
            router_id: self.id.clone(),
            table,
            outcome,
            updates_received,
            updates_sent,
            improving_rounds,
            finished_at: Utc::now(),
        })
    }

    async fn announce(&self, table: &RoutingTable) -> Result<()> {
        let update = ProtocolMessage::Update {
            router_id: self.id.clone(),
            table: table.costs().clone(),
        };
        transport::send_message(&self.socket, &update, self.server_addr, Phase::RouterConverging).await
    }

    fn publish(&self, state: RouterState, table: &RoutingTable) {
        self.status.send_replace(RouterStatus {
            state,
            table: Some(table.clone()),
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Cost, DistanceVector};

    async fn fake_server() -> (UdpSocket, RouterConfig) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = RouterConfig {
            server_addr: server.local_addr().unwrap(),
            ..RouterConfig::default()
        };
        (server, config)
    }

    async fn recv(server: &UdpSocket) -> (ProtocolMessage, SocketAddr) {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let (len, from) = server.recv_from(&mut buffer).await.unwrap();
        (ProtocolMessage::deserialize(&buffer[..len]).unwrap(), from)
    }

    async fn send(server: &UdpSocket, message: ProtocolMessage, to: SocketAddr) {
        server.send_to(&message.serialize().unwrap(), to).await.unwrap();
    }

    fn vector(entries: &[(&str, Cost)]) -> DistanceVector {
        entries.iter().map(|(id, cost)| (id.to_string(), *cost)).collect()
    }

    #[tokio::test]
    async fn joins_seeds_and_relaxes() {
        let (server, config) = fake_server().await;
        let router = Router::bind("a", &config).await.unwrap();
        let handle = router.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(router.run(shutdown_rx));

        let (join, router_addr) = recv(&server).await;
        assert_eq!(join, ProtocolMessage::Join { router_id: "a".into() });
        assert_eq!(handle.state(), RouterState::Connecting);

        let initial = vector(&[("a", Cost::ZERO), ("b", Cost::Finite(1)), ("c", Cost::Finite(5))]);
        send(&server, ProtocolMessage::Response { router_id: "a".into(), table: initial.clone() }, router_addr).await;

        let (seed, _) = recv(&server).await;
        assert_eq!(seed, ProtocolMessage::Update { router_id: "a".into(), table: initial });

        let from_b = vector(&[("a", Cost::Finite(1)), ("b", Cost::ZERO), ("c", Cost::Finite(1))]);
        send(&server, ProtocolMessage::Update { router_id: "b".into(), table: from_b.clone() }, router_addr).await;

        let (improved, _) = recv(&server).await;
        let expected = vector(&[("a", Cost::ZERO), ("b", Cost::Finite(1)), ("c", Cost::Finite(2))]);
        assert_eq!(improved, ProtocolMessage::Update { router_id: "a".into(), table: expected });

        // Same report again: nothing changes, so nothing is sent before TERMINATE.
        send(&server, ProtocolMessage::Update { router_id: "b".into(), table: from_b }, router_addr).await;
        send(&server, ProtocolMessage::Terminate, router_addr).await;

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.outcome, Outcome::Terminated);
        assert_eq!(report.updates_received, 2);
        assert_eq!(report.updates_sent, 2);
        assert_eq!(report.table.next_hop("c"), Some("b"));

        let stabilized = handle.stabilized().await.unwrap();
        assert_eq!(stabilized, report.table);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn non_response_after_join_is_fatal() {
        let (server, config) = fake_server().await;
        let router = Router::bind("a", &config).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(router.run(shutdown_rx));

        let (_, router_addr) = recv(&server).await;
        send(&server, ProtocolMessage::Terminate, router_addr).await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol { phase: Phase::RouterConnecting, .. }));
    }

    #[tokio::test]
    async fn response_for_another_router_is_fatal() {
        let (server, config) = fake_server().await;
        let router = Router::bind("a", &config).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(router.run(shutdown_rx));

        let (_, router_addr) = recv(&server).await;
        let table = vector(&[("b", Cost::ZERO)]);
        send(&server, ProtocolMessage::Response { router_id: "b".into(), table }, router_addr).await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn connect_timeout_gives_up() {
        let (_server, mut config) = fake_server().await;
        config.connect_timeout_ms = Some(50);
        let router = Router::bind("a", &config).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let err = router.run(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { phase: Phase::RouterConnecting, .. }));
    }

    #[tokio::test]
    async fn shutdown_stops_a_converging_router() {
        let (server, config) = fake_server().await;
        let router = Router::bind("a", &config).await.unwrap();
        let handle = router.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(router.run(shutdown_rx));

        let (_, router_addr) = recv(&server).await;
        let table = vector(&[("a", Cost::ZERO), ("b", Cost::Infinity)]);
        send(&server, ProtocolMessage::Response { router_id: "a".into(), table }, router_addr).await;
        recv(&server).await;

        shutdown_tx.send(()).unwrap();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.outcome, Outcome::Shutdown);
        assert_eq!(report.table.cost("b"), Cost::Infinity);
        assert_eq!(handle.state(), RouterState::Stopped);
        assert!(handle.stabilized().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_while_connecting_is_cancelled() {
        let (_server, config) = fake_server().await;
        let router = Router::bind("a", &config).await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();

        let err = router.run(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { phase: Phase::RouterConnecting }));
    }
}
