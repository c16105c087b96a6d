//! Per-peer connection automaton
//!
//! One task per remote peer owns the connection state: Connecting until
//! the first Pong arrives, Established afterwards. The task multiplexes
//! the hole-punch retry timer, the keepalive ticker, the outbound frame
//! queue, Pong events from the dispatcher and the termination signal.
//! External parties hold a [`ConnectionHandle`] and interact only
//! through its channels.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use wiremesh_proto::constants::{
    keepalive_cutoff, CONNECTING_RETRY_INTERVAL, PEER_KEEPALIVE_INTERVAL,
};
use wiremesh_proto::{encode, CtrlPing, PacketType};

/// Capacity of the per-connection outbound frame queue
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// Capacity of the Pong event queue; a dropped event is recovered by
/// the next keepalive ping
const PONG_QUEUE_CAPACITY: usize = 16;

/// Close notification delivered to the owner when a connection task
/// exits. Tagged with the connection id so the owner never removes a
/// replacement connection created for the same peer.
pub(crate) struct ClosedConnection {
    pub peer_virt_addr: String,
    pub id: u64,
}

/// Lookup handle stored in the node's connection table
pub(crate) struct ConnectionHandle {
    pub remote_addr: SocketAddr,
    pub id: u64,
    established: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<Bytes>,
    pong_tx: mpsc::Sender<()>,
    die_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Enqueue an encoded datagram for the peer without blocking.
    pub fn try_send_frame(&self, frame: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.outbound_tx.try_send(frame)
    }

    /// Report a received Pong. Duplicate events may collapse.
    pub fn notify_pong(&self) {
        let _ = self.pong_tx.try_send(());
    }

    /// Signal the connection task to close its socket and exit.
    pub fn close(&self) {
        let _ = self.die_tx.send(true);
    }

    /// Termination signal receiver for companion tasks (the socket
    /// read loop).
    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.die_tx.subscribe()
    }
}

pub(crate) struct ConnectionParams {
    pub id: u64,
    pub self_virt_addr: String,
    pub peer_virt_addr: String,
    pub remote_addr: SocketAddr,
    pub socket: Arc<UdpSocket>,
    pub closed_tx: mpsc::Sender<ClosedConnection>,
}

/// Create a connection in the Connecting state and start its task.
pub(crate) fn spawn(params: ConnectionParams) -> ConnectionHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (pong_tx, pong_rx) = mpsc::channel(PONG_QUEUE_CAPACITY);
    let (die_tx, die_rx) = watch::channel(false);
    let established = Arc::new(AtomicBool::new(false));

    let actor = ConnectionActor {
        id: params.id,
        self_virt_addr: params.self_virt_addr,
        peer_virt_addr: params.peer_virt_addr,
        remote_addr: params.remote_addr,
        socket: params.socket,
        established: established.clone(),
        last_pong: tokio::time::Instant::now(),
        closed_tx: params.closed_tx,
    };
    tokio::spawn(actor.run(outbound_rx, pong_rx, die_rx));

    ConnectionHandle {
        remote_addr: params.remote_addr,
        id: params.id,
        established,
        outbound_tx,
        pong_tx,
        die_tx,
    }
}

struct ConnectionActor {
    id: u64,
    self_virt_addr: String,
    peer_virt_addr: String,
    remote_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    established: Arc<AtomicBool>,
    last_pong: tokio::time::Instant,
    closed_tx: mpsc::Sender<ClosedConnection>,
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut outbound_rx: mpsc::Receiver<Bytes>,
        mut pong_rx: mpsc::Receiver<()>,
        mut die_rx: watch::Receiver<bool>,
    ) {
        let mut connect_retry = tokio::time::interval(CONNECTING_RETRY_INTERVAL);
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + PEER_KEEPALIVE_INTERVAL,
            PEER_KEEPALIVE_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = connect_retry.tick() => {
                    if !self.established.load(Ordering::Acquire) {
                        self.ping().await;
                    }
                }

                _ = keepalive.tick() => {
                    // Keepalive timeout: close and wait for reconnect.
                    if self.last_pong.elapsed() > keepalive_cutoff() {
                        debug!(peer = %self.peer_virt_addr, "keepalive timeout");
                        break;
                    }
                    self.ping().await;
                }

                frame = outbound_rx.recv() => match frame {
                    Some(frame) => self.send(&frame).await,
                    None => break,
                },

                event = pong_rx.recv() => match event {
                    Some(()) => {
                        self.last_pong = tokio::time::Instant::now();
                        if !self.established.swap(true, Ordering::AcqRel) {
                            info!(
                                peer = %self.peer_virt_addr,
                                remote = %self.remote_addr,
                                "connection established"
                            );
                        }
                    }
                    None => break,
                },

                _ = die_rx.changed() => break,
            }
        }

        info!(peer = %self.peer_virt_addr, destination = %self.remote_addr, "connection closed");
        let _ = self
            .closed_tx
            .send(ClosedConnection {
                peer_virt_addr: self.peer_virt_addr,
                id: self.id,
            })
            .await;
    }

    async fn send(&self, frame: &[u8]) {
        if let Err(e) = self.socket.send(frame).await {
            error!(
                peer = %self.peer_virt_addr,
                established = self.established.load(Ordering::Acquire),
                error = %e,
                "send message failed"
            );
        }
    }

    async fn ping(&self) {
        match encode(PacketType::Ping, &CtrlPing::new(self.self_virt_addr.as_str())) {
            Ok(frame) => self.send(&frame).await,
            Err(e) => error!(error = %e, "encode ping failed"),
        }
    }
}
