//! Reliable notifier
//!
//! Delivery layer over the gateway's UDP socket. OpenTunnel
//! notifications are kept in a retry map until the peer acknowledges
//! them or the send cap is reached; relay frames are fire-and-forget.
//! Sends fan out across a worker pool with round-robin dispatch;
//! workers resolve the destination string at send time and never exit
//! on transient errors.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, warn};

use wiremesh_proto::constants::{MAX_RETRY_SEND, NOTIFY_RETRY_INTERVAL};
use wiremesh_proto::{encode, encode_raw, CtrlOpenTunnel, PacketType};

use crate::registry::PeerRecord;

/// Capacity of the fire-and-forget ingress queue
const QUEUE_CAPACITY: usize = 16;

/// Capacity of each worker's send queue
const WORKER_QUEUE_CAPACITY: usize = 256;

/// An encoded datagram bound for a peer endpoint
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    pub destination: String,
    pub frame: Bytes,
}

/// A notification awaiting acknowledgment
#[derive(Debug)]
struct RetryEntry {
    destination: String,
    frame: Bytes,
    /// Number of times this frame has been handed to a worker
    counter: u32,
}

struct Inner {
    ack_id: AtomicI64,
    pending: DashMap<i64, RetryEntry>,
    wake: Notify,
    queue_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
}

/// Handle to the notifier; cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
    queue_tx: mpsc::Sender<Outbound>,
}

impl Notifier {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                ack_id: AtomicI64::new(0),
                pending: DashMap::new(),
                wake: Notify::new(),
                queue_rx: Mutex::new(Some(queue_rx)),
            }),
            queue_tx,
        }
    }

    /// Enqueue OpenTunnel notifications for both ends of a tunnel, each
    /// carrying the counterpart's endpoint and a fresh ack identifier,
    /// then wake the retry sweep.
    pub fn open_tunnel(&self, src: &PeerRecord, dst: &PeerRecord) {
        for (to, about) in [(src, dst), (dst, src)] {
            let ack_id = self.inner.ack_id.fetch_add(1, Ordering::SeqCst) + 1;
            let msg = CtrlOpenTunnel {
                ack_id,
                virt_address: about.virt_address.clone(),
                udp_address: about.udp_address.clone(),
            };
            let frame = match encode(PacketType::OpenTunnel, &msg) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "encode OpenTunnel failed");
                    continue;
                }
            };
            self.inner.pending.insert(
                ack_id,
                RetryEntry {
                    destination: to.udp_address.clone(),
                    frame,
                    counter: 0,
                },
            );
            debug!(ack_id, to = %to.udp_address, peer = %about.virt_address, "open tunnel queued");
        }

        self.notify();
    }

    /// Remove the retry entry matching an OpenTunnelAck. An ack that
    /// arrives before the first send is legal and removes the entry.
    pub fn ack(&self, ack_id: i64) {
        self.inner.pending.remove(&ack_id);
    }

    /// Forward an opaque frame to a peer endpoint, fire-and-forget.
    /// Blocks briefly when the ingress queue is saturated.
    pub async fn relay(&self, destination: String, data: &[u8]) {
        let outbound = Outbound {
            destination,
            frame: encode_raw(data),
        };
        if self.queue_tx.send(outbound).await.is_err() {
            error!("notifier queue closed, dropping relay frame");
        }
    }

    /// Non-blocking wake of the retry sweep; duplicate wakes collapse.
    pub fn notify(&self) {
        self.inner.wake.notify_one();
    }

    /// Number of notifications still awaiting acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Collect every pending entry due for (re-)sending, incrementing
    /// its counter, and silently evict entries over the send cap.
    fn collect_due(&self) -> Vec<Outbound> {
        let mut due = Vec::new();
        self.inner.pending.retain(|_, entry| {
            if entry.counter >= MAX_RETRY_SEND {
                return false;
            }
            entry.counter += 1;
            due.push(Outbound {
                destination: entry.destination.clone(),
                frame: entry.frame.clone(),
            });
            true
        });
        due
    }

    /// Run the notifier: spawn the worker pool and multiplex the retry
    /// ticker, the explicit wake and the fire-and-forget queue. Runs
    /// until the gateway shuts down.
    pub async fn run(self, socket: Arc<UdpSocket>, concurrency: usize) {
        let Some(mut queue_rx) = self.inner.queue_rx.lock().await.take() else {
            error!("notifier already running");
            return;
        };

        let mut pool = WorkerPool::spawn(socket, concurrency.max(1));
        let mut ticker = tokio::time::interval(NOTIFY_RETRY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for outbound in self.collect_due() {
                        pool.dispatch(outbound).await;
                    }
                }
                _ = self.inner.wake.notified() => {
                    for outbound in self.collect_due() {
                        pool.dispatch(outbound).await;
                    }
                }
                recv = queue_rx.recv() => match recv {
                    Some(outbound) => pool.dispatch(outbound).await,
                    None => return,
                },
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed pool of send workers with round-robin dispatch
struct WorkerPool {
    queues: Vec<mpsc::Sender<Outbound>>,
    round_trip: usize,
}

impl WorkerPool {
    fn spawn(socket: Arc<UdpSocket>, concurrency: usize) -> Self {
        let mut queues = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            queues.push(tx);
            tokio::spawn(worker(socket.clone(), rx));
        }
        Self {
            queues,
            round_trip: 0,
        }
    }

    async fn dispatch(&mut self, outbound: Outbound) {
        let index = self.round_trip % self.queues.len();
        self.round_trip = self.round_trip.wrapping_add(1);
        if self.queues[index].send(outbound).await.is_err() {
            error!("notifier worker gone, dropping frame");
        }
    }
}

async fn worker(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let addr = match tokio::net::lookup_host(&outbound.destination).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    error!(destination = %outbound.destination, "destination did not resolve");
                    continue;
                }
            },
            Err(e) => {
                error!(destination = %outbound.destination, error = %e, "unexpected destination address");
                continue;
            }
        };

        if let Err(e) = socket.send_to(&outbound.frame, addr).await {
            warn!(destination = %outbound.destination, error = %e, "send message failed");
        }
    }
}
