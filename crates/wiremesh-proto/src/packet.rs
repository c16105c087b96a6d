//! Packet type tags
//!
//! Every datagram is `[type: 1 byte][payload]`. The tag values are part
//! of the wire format and must never be reordered.

use crate::error::ProtoError;

/// Packet type identifier (byte 0 of every datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Node -> gateway liveness and endpoint registration
    Heartbeat = 0,

    /// Gateway -> node tunnel notification (requires ack)
    OpenTunnel = 1,

    /// Node -> gateway acknowledgment of an OpenTunnel
    OpenTunnelAck = 2,

    /// Node -> node hole-punch probe / keepalive
    Ping = 3,

    /// Node -> node reply to Ping
    Pong = 4,

    /// Opaque raw IPv4 frame, no inner schema
    Data = 5,

    /// Node -> gateway request to forward a frame to another peer
    Relay = 6,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Heartbeat),
            1 => Ok(Self::OpenTunnel),
            2 => Ok(Self::OpenTunnelAck),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            5 => Ok(Self::Data),
            6 => Ok(Self::Relay),
            _ => Err(ProtoError::UnknownPacketType(value)),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Heartbeat => "Heartbeat",
            Self::OpenTunnel => "OpenTunnel",
            Self::OpenTunnelAck => "OpenTunnelAck",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Data => "Data",
            Self::Relay => "Relay",
        };
        f.write_str(name)
    }
}
