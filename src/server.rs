use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::error::{Error, Phase, Result};
use crate::network::transport::{self, RECV_BUFFER_SIZE};
use crate::network::Topology;
use crate::protocol::ProtocolMessage;
use crate::{shutdown_signalled, RouterId};

/// Router addresses learned from JOIN. Complete and read-only once JOINING ends.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    addresses: BTreeMap<RouterId, SocketAddr>,
}

impl PeerDirectory {
    pub fn address(&self, router_id: &str) -> Option<SocketAddr> {
        self.addresses.get(router_id).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouterId, &SocketAddr)> {
        self.addresses.iter()
    }
}

/// Why forwarding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// No datagram within the idle window: assumed converged.
    Idle,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub updates_relayed: u64,
    pub datagrams_forwarded: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub joined: Vec<RouterId>,
    pub relay: RelayStats,
    pub stopped_by: StopReason,
    pub forwarding_time: Duration,
}

/// Hands out initial vectors, relays UPDATEs to configured neighbors and
/// declares convergence after a quiet period.
///
/// Convergence is inferred, not proven: a slow datagram or a round still in
/// flight when the idle window lapses ends the run early.
pub struct RendezvousServer {
    socket: Arc<UdpSocket>,
    topology: Arc<Topology>,
    idle_timeout: Duration,
}

impl RendezvousServer {
    pub async fn bind(topology: Topology, config: &ServerConfig) -> Result<Self> {
        let socket = transport::bind(config.bind_addr, Phase::ServerJoining).await?;

        Ok(Self {
            socket: Arc::new(socket),
            topology: Arc::new(topology),
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|source| Error::Transport {
            phase: Phase::ServerJoining,
            operation: "local_addr",
            source,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<ServerReport> {
        info!(
            "Rendezvous server accepting {} routers on {}",
            self.topology.len(),
            self.local_addr()?
        );

        let peers = Arc::new(self.accept(&mut shutdown).await?);
        self.respond(&peers).await?;

        info!("All routers joined, forwarding updates (idle window {:?})", self.idle_timeout);
        let started = Instant::now();
        let (relay, stopped_by) = self.forward_until_idle(peers.clone(), &mut shutdown).await?;
        let forwarding_time = started.elapsed();

        self.terminate(&peers).await?;
        info!(
            "Server finished after {:?} ({:?}): {} updates relayed as {} datagrams",
            forwarding_time, stopped_by, relay.updates_relayed, relay.datagrams_forwarded
        );

        Ok(ServerReport {
            joined: peers.iter().map(|(id, _)| id.clone()).collect(),
            relay,
            stopped_by,
            forwarding_time,
        })
    }

    /// JOINING: record an address per configured router until every one has joined.
    async fn accept(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<PeerDirectory> {
        const PHASE: Phase = Phase::ServerJoining;

        let mut peers = PeerDirectory::default();
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        while peers.len() < self.topology.len() {
            let (message, from) = tokio::select! {
                result = transport::recv_message(&self.socket, &mut buffer, PHASE) => result?,
                _ = shutdown_signalled(shutdown) => return Err(Error::Cancelled { phase: PHASE }),
            };

            match message {
                ProtocolMessage::Join { router_id } if self.topology.contains(&router_id) => {
                    match peers.addresses.insert(router_id.clone(), from) {
                        Some(previous) => warn!("Router {} joined again from {} (was {})", router_id, from, previous),
                        None => info!(
                            "Router {} joined from {} ({}/{})",
                            router_id,
                            from,
                            peers.len(),
                            self.topology.len()
                        ),
                    }
                }
                ProtocolMessage::Join { router_id } => {
                    warn!("Ignoring JOIN from unconfigured router {} at {}", router_id, from);
                }
                other => {
                    warn!("Discarding {} from {} while routers are joining", other.kind(), from);
                }
            }
        }

        Ok(peers)
    }

    /// One RESPONSE per router, carrying its configured initial vector.
    async fn respond(&self, peers: &PeerDirectory) -> Result<()> {
        for (router_id, entry) in self.topology.iter() {
            let Some(addr) = peers.address(router_id) else {
                continue;
            };
            let response = ProtocolMessage::Response {
                router_id: router_id.clone(),
                table: entry.initial_vector.clone(),
            };
            transport::send_message(&self.socket, &response, addr, Phase::ServerJoining).await?;
        }
        Ok(())
    }

    /// FORWARDING: relay in a separate task while this one watches for a quiet period.
    async fn forward_until_idle(
        &self,
        peers: Arc<PeerDirectory>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(RelayStats, StopReason)> {
        let (activity_tx, mut activity_rx) = watch::channel(Instant::now());
        let (stop_tx, stop_rx) = oneshot::channel();

        let relay = tokio::spawn(relay_loop(
            self.socket.clone(),
            self.topology.clone(),
            peers,
            activity_tx,
            stop_rx,
        ));

        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let stopped_by = loop {
            tokio::select! {
                _ = &mut idle => break Some(StopReason::Idle),
                changed = activity_rx.changed() => {
                    // The relay drops its sender only when it exits on its own.
                    if changed.is_err() {
                        break None;
                    }
                    let last_activity = *activity_rx.borrow_and_update();
                    idle.as_mut().reset(last_activity + self.idle_timeout);
                }
                _ = shutdown_signalled(shutdown) => break Some(StopReason::Shutdown),
            }
        };

        // The relay must be gone before TERMINATE goes out.
        let _ = stop_tx.send(());
        let stats = relay.await.map_err(|e| Error::Task {
            unit: "relay".into(),
            detail: e.to_string(),
        })??;

        let Some(stopped_by) = stopped_by else {
            return Err(Error::Task {
                unit: "relay".into(),
                detail: "exited before it was stopped".into(),
            });
        };
        if stopped_by == StopReason::Idle {
            info!("No traffic for {:?}, assuming convergence", self.idle_timeout);
        }

        Ok((stats, stopped_by))
    }

    /// TERMINATING: every joined router gets exactly one TERMINATE.
    async fn terminate(&self, peers: &PeerDirectory) -> Result<()> {
        let data = transport::encode(&ProtocolMessage::Terminate, Phase::ServerTerminating)?;
        for (router_id, addr) in peers.iter() {
            transport::send_encoded(&self.socket, &data, *addr, Phase::ServerTerminating).await?;
            debug!("TERMINATE sent to {} at {}", router_id, addr);
        }
        info!("TERMINATE sent to {} routers", peers.len());
        Ok(())
    }
}

async fn relay_loop(
    socket: Arc<UdpSocket>,
    topology: Arc<Topology>,
    peers: Arc<PeerDirectory>,
    activity: watch::Sender<Instant>,
    mut stop: oneshot::Receiver<()>,
) -> Result<RelayStats> {
    const PHASE: Phase = Phase::ServerForwarding;

    let mut stats = RelayStats::default();
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let (message, from) = tokio::select! {
            biased;
            _ = &mut stop => break,
            result = transport::recv_message(&socket, &mut buffer, PHASE) => result?,
        };
        activity.send_replace(Instant::now());

        let sender = match &message {
            ProtocolMessage::Update { router_id, .. } if topology.contains(router_id) => router_id.clone(),
            ProtocolMessage::Update { router_id, .. } => {
                warn!("Discarding UPDATE from unconfigured router {} at {}", router_id, from);
                stats.discarded += 1;
                continue;
            }
            other => {
                debug!("Discarding {} from {} while forwarding", other.kind(), from);
                stats.discarded += 1;
                continue;
            }
        };

        // Same bytes for every neighbor; only the destination address changes.
        let data = transport::encode(&message, PHASE)?;
        let neighbors = topology.neighbors(&sender);
        for neighbor in neighbors {
            match peers.address(neighbor) {
                Some(addr) => {
                    transport::send_encoded(&socket, &data, addr, PHASE).await?;
                    stats.datagrams_forwarded += 1;
                }
                None => warn!("Neighbor {} of {} never joined, skipping", neighbor, sender),
            }
        }
        stats.updates_relayed += 1;

        if let Some(table) = message.table() {
            debug!("{} forwards to {:?} with table {:?}", sender, neighbors, table);
        }
    }

    Ok(stats)
}
