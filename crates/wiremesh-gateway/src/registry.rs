//! Peer registry
//!
//! Maps virtual addresses to the public UDP endpoint last observed on a
//! heartbeat. Entries are upserted by the ingress path and read by the
//! tunnel broker; both may race on different keys.

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;
use tracing::info;

/// A peer known to the gateway
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Virtual address inside the overlay /16
    pub virt_address: String,

    /// Public UDP endpoint (`ip:port`) last observed by the gateway
    pub udp_address: String,

    /// Arrival time of the most recent heartbeat
    pub last_heartbeat: Instant,
}

/// Registry of all peers that ever heartbeated this gateway
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer from a heartbeat. Refreshes the timestamp and
    /// overwrites the endpoint when the NAT rebound it. Heartbeats with
    /// an empty virtual address are ignored silently.
    pub fn heartbeat(&self, remote: SocketAddr, virt_address: &str) {
        if virt_address.is_empty() {
            return;
        }

        let endpoint = remote.to_string();
        if let Some(mut peer) = self.peers.get_mut(virt_address) {
            peer.last_heartbeat = Instant::now();
            if peer.udp_address != endpoint {
                peer.udp_address = endpoint;
            }
            return;
        }

        info!(peer = virt_address, %remote, "new peer registered");
        self.peers.insert(
            virt_address.to_string(),
            PeerRecord {
                virt_address: virt_address.to_string(),
                udp_address: endpoint,
                last_heartbeat: Instant::now(),
            },
        );
    }

    /// Look up a peer by virtual address.
    pub fn lookup(&self, virt_address: &str) -> Option<PeerRecord> {
        self.peers.get(virt_address).map(|p| p.clone())
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
