//! Control message schemas
//!
//! Structured payloads carried after the packet type tag. Encoded with
//! bincode, which is byte-faithful for these fixed schemas.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

/// Length of the random nonce carried by Ping/Pong probes
pub const NONCE_LEN: usize = 128;

/// Periodic node -> gateway liveness report. The gateway learns the
/// sender's public endpoint from the datagram source address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlHeartbeat {
    /// Virtual address of the sending node
    pub virt_address: String,
}

/// Gateway -> node notification that a tunnel to a peer should be
/// opened. Delivered reliably; the node must acknowledge `ack_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlOpenTunnel {
    /// Identifier the node echoes back in CtrlOpenTunnelAck
    pub ack_id: i64,

    /// Virtual address of the counterpart peer
    pub virt_address: String,

    /// Public UDP endpoint of the counterpart peer
    pub udp_address: String,
}

/// Node -> gateway acknowledgment of a CtrlOpenTunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlOpenTunnelAck {
    pub ack_id: i64,
}

/// Hole-punch probe and keepalive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlPing {
    /// Virtual address of the sender
    pub virt_address: String,

    /// Random padding, not verified by the receiver
    #[serde(with = "BigArray")]
    pub nonce: [u8; NONCE_LEN],
}

/// Reply to CtrlPing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlPong {
    /// Virtual address of the sender
    pub virt_address: String,

    #[serde(with = "BigArray")]
    pub nonce: [u8; NONCE_LEN],
}

/// Node -> gateway request to forward an IP frame to the peer owning
/// `virt_address`, used while no direct path exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlRelay {
    /// Virtual address of the destination peer
    pub virt_address: String,

    /// Raw IPv4 frame
    pub data: Vec<u8>,
}

impl CtrlPing {
    pub fn new(virt_address: impl Into<String>) -> Self {
        Self {
            virt_address: virt_address.into(),
            nonce: random_nonce(),
        }
    }
}

impl CtrlPong {
    pub fn new(virt_address: impl Into<String>) -> Self {
        Self {
            virt_address: virt_address.into(),
            nonce: random_nonce(),
        }
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::packet::PacketType;

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = CtrlHeartbeat {
            virt_address: "10.0.0.1".to_string(),
        };
        let frame = encode(PacketType::Heartbeat, &msg).unwrap();
        assert_eq!(frame[0], PacketType::Heartbeat as u8);
        let decoded: CtrlHeartbeat = decode(&frame[1..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_open_tunnel_roundtrip() {
        let msg = CtrlOpenTunnel {
            ack_id: 42,
            virt_address: "10.0.0.2".to_string(),
            udp_address: "203.0.113.7:18233".to_string(),
        };
        let frame = encode(PacketType::OpenTunnel, &msg).unwrap();
        let decoded: CtrlOpenTunnel = decode(&frame[1..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_ping_carries_full_nonce() {
        let ping = CtrlPing::new("10.0.0.1");
        let frame = encode(PacketType::Ping, &ping).unwrap();
        let decoded: CtrlPing = decode(&frame[1..]).unwrap();
        assert_eq!(decoded.nonce.len(), NONCE_LEN);
        assert_eq!(decoded, ping);
    }

    #[test]
    fn test_relay_roundtrip() {
        let msg = CtrlRelay {
            virt_address: "10.0.0.9".to_string(),
            data: vec![0x45, 0, 0, 20, 1, 2, 3],
        };
        let frame = encode(PacketType::Relay, &msg).unwrap();
        let decoded: CtrlRelay = decode(&frame[1..]).unwrap();
        assert_eq!(decoded, msg);
    }
}
