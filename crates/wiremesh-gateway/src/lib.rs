//! Wiremesh Gateway
//!
//! Centralized rendezvous for peers behind NAT:
//! - Peer registry fed by UDP heartbeats
//! - Tunnel broker exposed over HTTP
//! - Reliable notifier delivering OpenTunnel messages until acked
//! - Relay path forwarding opaque frames while peers hole-punch

pub mod error;
pub mod http;
pub mod notifier;
pub mod processor;
pub mod registry;
pub mod server;

pub use error::{GatewayError, GatewayResult};
pub use notifier::Notifier;
pub use processor::Processor;
pub use registry::{PeerRecord, PeerRegistry};
pub use server::{serve, Options};
