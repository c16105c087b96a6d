//! Wiremesh Node
//!
//! The local peer daemon:
//! - TUN pump deciding per destination between local delivery, direct
//!   forwarding and gateway relay
//! - Gateway link sharing one pinned UDP port with all peer sockets
//! - One connection automaton per reachable peer, driven by ping/pong
//!   hole-punch probes and keepalives
//! - UDP dispatcher routing datagrams by their type tag

mod connection;
mod dispatch;
mod socket;

pub mod error;
pub mod node;
pub mod tun;

pub use error::{NodeError, NodeResult};
pub use node::{Node, Options};
pub use tun::{create_tun, TunConfig, TunDevice};
