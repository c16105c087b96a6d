//! Wiremesh Wire Protocol
//!
//! Shared by the gateway and the peer nodes:
//! - Packet type tags and the byte-0-tag codec
//! - Control message schemas (heartbeat, tunnel brokering, keepalive, relay)
//! - Protocol constants and version

pub mod codec;
pub mod constants;
pub mod error;
pub mod message;
pub mod packet;

pub use codec::{decode, encode, encode_raw};
pub use error::{ProtoError, ProtoResult};
pub use message::{
    CtrlHeartbeat, CtrlOpenTunnel, CtrlOpenTunnelAck, CtrlPing, CtrlPong, CtrlRelay, NONCE_LEN,
};
pub use packet::PacketType;

/// Major protocol version. A gateway rejects clients whose major
/// version is lower than its own.
pub const MAJOR_VERSION: u64 = 1;

/// Full crate version string, used as the client version in
/// OpenTunnel requests.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
