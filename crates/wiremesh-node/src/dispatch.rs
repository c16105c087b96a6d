//! UDP dispatcher
//!
//! Routes datagrams by their type tag: raw Data into the TUN inbound
//! queue, Ping/Pong to the owning connection, OpenTunnel into tunnel
//! establishment. The gateway-facing socket and every per-peer socket
//! feed the same dispatch path.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use wiremesh_proto::constants::MAX_BUFFER_SIZE;
use wiremesh_proto::{
    decode, encode, CtrlOpenTunnel, CtrlOpenTunnelAck, CtrlPing, CtrlPong, PacketType,
};

use crate::connection::{self, ConnectionParams};
use crate::error::NodeResult;
use crate::node::Mesh;
use crate::socket;

impl Mesh {
    /// Read the gateway-facing socket until shutdown. The socket is
    /// connected, so only gateway traffic arrives here; peer traffic
    /// comes in through the per-connection read loops.
    pub(crate) async fn dispatch_loop(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> NodeResult<()> {
        let gateway_addr = self.gateway.peer_addr()?;
        let mut buffer = [0u8; MAX_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("dispatcher cancelled");
                    self.close_all();
                    return Ok(());
                }
                read = self.gateway.recv(&mut buffer) => {
                    match read {
                        Ok(n) => self.handle_datagram(gateway_addr, &buffer[..n]).await,
                        Err(e) => {
                            error!(error = %e, "read UDP failed");
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Demultiplex one datagram by its type tag.
    pub(crate) async fn handle_datagram(self: &Arc<Self>, remote: SocketAddr, data: &[u8]) {
        let Some((&tag, payload)) = data.split_first() else {
            return;
        };

        let packet_type = match PacketType::try_from(tag) {
            Ok(packet_type) => packet_type,
            Err(_) => {
                error!(tag, source = %remote, "unrecognized message type");
                return;
            }
        };

        match packet_type {
            PacketType::Data => {
                debug!(source = %remote, "receive data packet");
                let frame = Bytes::copy_from_slice(payload);
                if self.inbound_tx.try_send(frame).is_err() {
                    warn!("drop inbound data due to queue full");
                }
            }

            PacketType::Ping => match decode::<CtrlPing>(payload) {
                Ok(ping) => self.on_ping(remote, ping),
                Err(e) => error!(source = %remote, error = %e, "decode ping failed"),
            },

            PacketType::Pong => match decode::<CtrlPong>(payload) {
                Ok(pong) => self.on_pong(remote, pong),
                Err(e) => error!(source = %remote, error = %e, "decode pong failed"),
            },

            PacketType::OpenTunnel => match decode::<CtrlOpenTunnel>(payload) {
                Ok(open_tunnel) => self.on_open_tunnel(open_tunnel).await,
                Err(e) => error!(source = %remote, error = %e, "decode open tunnel failed"),
            },

            other => {
                debug!(packet_type = %other, source = %remote, "ignoring packet type");
            }
        }
    }

    /// Answer a hole-punch probe from a known peer; probes from
    /// unknown peers are dropped.
    fn on_ping(&self, source: SocketAddr, ping: CtrlPing) {
        let Some(conn) = self.connections.get(&ping.virt_address) else {
            return;
        };

        debug!(peer = %ping.virt_address, %source, "receive ping message");
        match encode(
            PacketType::Pong,
            &CtrlPong::new(self.local_virt_addr.as_str()),
        ) {
            Ok(frame) => {
                if conn.try_send_frame(frame).is_err() {
                    warn!(peer = %ping.virt_address, "drop pong due to queue full");
                }
            }
            Err(e) => error!(error = %e, "encode pong failed"),
        }
    }

    /// Refresh liveness of the matching connection, promoting it to
    /// Established on the first Pong.
    fn on_pong(&self, source: SocketAddr, pong: CtrlPong) {
        let Some(conn) = self.connections.get(&pong.virt_address) else {
            info!(vaddr = %pong.virt_address, "receive pong for unknown connection");
            return;
        };

        debug!(peer = %pong.virt_address, %source, "receive pong message");
        conn.notify_pong();
    }

    /// Handle a tunnel notification from the gateway. Idempotent per
    /// ack id: an existing connection to the same endpoint is only
    /// re-acknowledged; a different endpoint tears the old one down
    /// and dials the new one.
    async fn on_open_tunnel(self: &Arc<Self>, open_tunnel: CtrlOpenTunnel) {
        let remote_addr: SocketAddr = match open_tunnel.udp_address.parse() {
            Ok(addr) => addr,
            Err(_) => {
                error!(udp_address = %open_tunnel.udp_address, "invalid peer endpoint");
                return;
            }
        };

        // The table ref must not be held across an await.
        let mut already_connected = false;
        if let Some(conn) = self.connections.get(&open_tunnel.virt_address) {
            if conn.remote_addr == remote_addr {
                already_connected = true;
            } else {
                // Peer endpoint changed: reconnect to the new address.
                conn.close();
            }
        }
        if already_connected {
            self.send_open_tunnel_ack(open_tunnel.ack_id).await;
            return;
        }

        let peer_socket = match socket::dial_pinned(self.local_port, remote_addr).await {
            Ok(peer_socket) => Arc::new(peer_socket),
            Err(e) => {
                // No ack: the gateway's retry loop delivers another try.
                error!(remote = %remote_addr, error = %e, "dial peer failed");
                return;
            }
        };

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handle = connection::spawn(ConnectionParams {
            id,
            self_virt_addr: self.local_virt_addr.clone(),
            peer_virt_addr: open_tunnel.virt_address.clone(),
            remote_addr,
            socket: peer_socket.clone(),
            closed_tx: self.closed_tx.clone(),
        });

        self.spawn_peer_reader(remote_addr, peer_socket, handle.subscribe_close());
        self.connections.insert(open_tunnel.virt_address, handle);

        self.send_open_tunnel_ack(open_tunnel.ack_id).await;
    }

    async fn send_open_tunnel_ack(&self, ack_id: i64) {
        match encode(PacketType::OpenTunnelAck, &CtrlOpenTunnelAck { ack_id }) {
            Ok(frame) => {
                if let Err(e) = self.gateway.send(&frame).await {
                    error!(error = %e, "acknowledge open tunnel failed");
                }
            }
            Err(e) => error!(error = %e, "encode open tunnel ack failed"),
        }
    }

    /// Read loop of a per-peer connected socket; exits with the
    /// connection's termination signal.
    fn spawn_peer_reader(
        self: &Arc<Self>,
        remote_addr: SocketAddr,
        peer_socket: Arc<UdpSocket>,
        mut die_rx: watch::Receiver<bool>,
    ) {
        let mesh = self.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_BUFFER_SIZE];
            loop {
                tokio::select! {
                    _ = die_rx.changed() => return,
                    read = peer_socket.recv(&mut buffer) => {
                        match read {
                            Ok(n) => mesh.handle_datagram(remote_addr, &buffer[..n]).await,
                            Err(e) => {
                                // Transient, e.g. ICMP unreachable while the
                                // counterpart is still dialing.
                                info!(error = %e, "read peer connection failed");
                                continue;
                            }
                        }
                    }
                }
            }
        });
    }
}
