//! Local peer node
//!
//! Wires the TUN pump, the gateway link, the heartbeat loop and the UDP
//! dispatcher together. The gateway-facing socket and every per-peer
//! socket share one local port (SO_REUSEPORT), so the endpoint the
//! gateway observes is the one peers hole-punch.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use wiremesh_api::ApiClient;
use wiremesh_proto::constants::HEARTBEAT_INTERVAL;
use wiremesh_proto::{encode, encode_raw, CtrlHeartbeat, CtrlRelay, PacketType};

use crate::connection::{ClosedConnection, ConnectionHandle};
use crate::error::{NodeError, NodeResult};
use crate::socket;
use crate::tun::{create_tun, ip, TunConfig, TunDevice};

/// Capacity of the inbound queue feeding the TUN writer
const INBOUND_QUEUE_CAPACITY: usize = 128;

/// Capacity of the closed-connection notification queue
const CLOSED_QUEUE_CAPACITY: usize = 16;

/// How long an OpenTunnel request suppresses duplicates
const PENDING_OPEN_DEBOUNCE: Duration = Duration::from_secs(1);

/// Node CLI options
#[derive(Debug, Clone)]
pub struct Options {
    /// Gateway server `host:port`
    pub gateway: String,
    /// Key to connect to the gateway; reserved, not validated yet
    pub key: String,
    /// Local virtual address inside the overlay /16 (required)
    pub address: String,
    /// Talk to the gateway API over HTTPS
    pub tls: bool,
}

/// A local peer of the mesh
pub struct Node {
    opt: Options,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub fn new(opt: Options) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { opt, shutdown }
    }

    /// Provision the OS TUN device and serve until [`Node::stop`].
    pub async fn serve(&self) -> NodeResult<()> {
        let local_addr = parse_virt_address(&self.opt.address)?;
        let device = create_tun(TunConfig::new(local_addr)).await?;
        self.serve_with_device(Arc::from(device)).await
    }

    /// Serve on an externally provisioned TUN handle.
    pub async fn serve_with_device(&self, veth: Arc<dyn TunDevice>) -> NodeResult<()> {
        let local_addr = parse_virt_address(&self.opt.address)?;

        let gateway_addr = resolve_gateway(&self.opt.gateway).await?;
        let gateway = socket::bind_pinned(0)?;
        gateway.connect(gateway_addr).await?;
        let local = gateway.local_addr()?;
        info!(%local, "setup local address successfully");
        info!(device = veth.name(), "setup virtual network successfully");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (closed_tx, closed_rx) = mpsc::channel(CLOSED_QUEUE_CAPACITY);

        let mesh = Arc::new(Mesh {
            local_virt_addr: self.opt.address.clone(),
            local_addr,
            local_port: local.port(),
            gateway: Arc::new(gateway),
            veth,
            api: ApiClient::new(self.opt.gateway.clone(), self.opt.key.clone(), self.opt.tls),
            connections: DashMap::new(),
            pending: DashMap::new(),
            inbound_tx,
            closed_tx,
            next_conn_id: AtomicU64::new(1),
        });

        tokio::spawn(tun_writer(mesh.clone(), inbound_rx, self.shutdown.subscribe()));
        tokio::spawn(serve_veth(mesh.clone(), self.shutdown.subscribe()));
        tokio::spawn(heartbeat(mesh.clone(), self.shutdown.subscribe()));
        tokio::spawn(reap_closed(mesh.clone(), closed_rx));

        mesh.dispatch_loop(self.shutdown.subscribe()).await
    }

    /// Cancel every node task and close all peer connections.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn parse_virt_address(address: &str) -> NodeResult<Ipv4Addr> {
    address
        .parse()
        .map_err(|_| NodeError::InvalidAddress(address.to_string()))
}

async fn resolve_gateway(gateway: &str) -> NodeResult<SocketAddr> {
    tokio::net::lookup_host(gateway)
        .await
        .map_err(|_| NodeError::GatewayUnreachable(gateway.to_string()))?
        .next()
        .ok_or_else(|| NodeError::GatewayUnreachable(gateway.to_string()))
}

/// Shared node state; owned collectively by the node tasks.
pub(crate) struct Mesh {
    pub local_virt_addr: String,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub gateway: Arc<UdpSocket>,
    pub veth: Arc<dyn TunDevice>,
    pub api: ApiClient,
    /// virt address -> live connection
    pub connections: DashMap<String, ConnectionHandle>,
    /// virt address -> instant of the last OpenTunnel POST
    pub pending: DashMap<String, Instant>,
    pub inbound_tx: mpsc::Sender<Bytes>,
    pub closed_tx: mpsc::Sender<ClosedConnection>,
    pub next_conn_id: AtomicU64,
}

/// What to do with a frame read off the TUN device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TunAction {
    /// Non-IPv4 or outside the overlay /16
    Drop,
    /// Destination is the local virtual address
    Loopback,
    /// Deliver to the peer owning the destination address
    Forward(Ipv4Addr),
}

/// Classify a TUN frame by its destination.
pub(crate) fn classify(frame: &[u8], local: Ipv4Addr) -> TunAction {
    if !ip::is_ipv4(frame) {
        return TunAction::Drop;
    }
    let Some(destination) = ip::ipv4_destination(frame) else {
        return TunAction::Drop;
    };

    // Only the shared /16 is routed through the mesh.
    let dst = destination.octets();
    let here = local.octets();
    if dst[0] != here[0] || dst[1] != here[1] {
        return TunAction::Drop;
    }

    if destination == local {
        return TunAction::Loopback;
    }
    TunAction::Forward(destination)
}

impl Mesh {
    /// Route one frame read off the TUN device.
    pub(crate) async fn handle_frame(self: &Arc<Self>, frame: Bytes) {
        match classify(&frame, self.local_addr) {
            TunAction::Drop => {}
            TunAction::Loopback => {
                if let Err(e) = self.veth.write(&frame).await {
                    debug!(error = %e, "loopback write failed");
                }
            }
            TunAction::Forward(destination) => {
                self.forward(destination.to_string(), frame).await;
            }
        }
    }

    /// Deliver a frame to a peer: direct when the connection is
    /// established, relayed through the gateway while it is still
    /// connecting, and otherwise kick off tunnel establishment.
    pub(crate) async fn forward(self: &Arc<Self>, virt_address: String, frame: Bytes) {
        debug!(dest = %virt_address, "send packet");

        let relay_needed = match self.connections.get(&virt_address) {
            Some(conn) if conn.is_established() => {
                if conn.try_send_frame(encode_raw(&frame)).is_err() {
                    warn!(destination = %virt_address, "drop data due to queue full");
                }
                return;
            }
            Some(_) => true,
            None => false,
        };

        if relay_needed {
            debug!(dest = %virt_address, "relay data due to connection not ready");
            let msg = CtrlRelay {
                virt_address: virt_address.clone(),
                data: frame.to_vec(),
            };
            match encode(PacketType::Relay, &msg) {
                Ok(datagram) => {
                    if let Err(e) = self.gateway.send(&datagram).await {
                        warn!(error = %e, "send relay failed");
                    }
                }
                Err(e) => error!(error = %e, "encode relay failed"),
            }
            return;
        }

        // No connection yet: debounce OpenTunnel requests per peer.
        if let Some(pending) = self.pending.get(&virt_address) {
            if pending.elapsed() < PENDING_OPEN_DEBOUNCE {
                return;
            }
        }

        info!(peer = %virt_address, "try to establish connection");
        self.pending.insert(virt_address.clone(), Instant::now());

        let mesh = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mesh
                .api
                .open_tunnel(&mesh.local_virt_addr, &virt_address)
                .await
            {
                error!(dest = %virt_address, error = %e, "try to establish connection failed");
            }
            mesh.pending.remove(&virt_address);
        });
    }

    /// Close every live connection; called on shutdown.
    pub(crate) fn close_all(&self) {
        for conn in self.connections.iter() {
            conn.close();
        }
        self.connections.clear();
    }
}

/// Pump frames from the virtual device into the mesh.
async fn serve_veth(mesh: Arc<Mesh>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("serve virtual device cancelled");
                return;
            }
            read = mesh.veth.read() => {
                match read {
                    Ok(frame) => mesh.handle_frame(frame).await,
                    Err(e) => {
                        debug!(error = %e, "read virtual device failed");
                        continue;
                    }
                }
            }
        }
    }
}

/// Drain received Data payloads into the virtual device.
async fn tun_writer(
    mesh: Arc<Mesh>,
    mut inbound_rx: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            recv = inbound_rx.recv() => match recv {
                Some(frame) => {
                    if let Err(e) = mesh.veth.write(&frame).await {
                        debug!(error = %e, "write to virtual device failed");
                    }
                }
                None => return,
            },
        }
    }
}

/// Keep the gateway's view of this peer fresh: heartbeat immediately
/// and then every interval.
async fn heartbeat(mesh: Arc<Mesh>, mut shutdown: watch::Receiver<bool>) {
    let frame = match encode(
        PacketType::Heartbeat,
        &CtrlHeartbeat {
            virt_address: mesh.local_virt_addr.clone(),
        },
    ) {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "encode heartbeat failed");
            return;
        }
    };

    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("UDP heartbeat cancelled");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = mesh.gateway.send(&frame).await {
                    error!(error = %e, "send heartbeat failed");
                }
            }
        }
    }
}

/// Remove closed connections from the table. The id check keeps a
/// replacement connection for the same peer alive when the old task
/// tears down late.
async fn reap_closed(mesh: Arc<Mesh>, mut closed_rx: mpsc::Receiver<ClosedConnection>) {
    while let Some(closed) = closed_rx.recv().await {
        mesh.connections
            .remove_if(&closed.peer_virt_addr, |_, conn| conn.id == closed.id);
    }
}
