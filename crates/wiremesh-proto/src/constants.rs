//! Protocol timing and sizing constants

use std::time::Duration;

/// Interval between node -> gateway heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Max buffer size for reading a UDP datagram
pub const MAX_BUFFER_SIZE: usize = 4096;

/// Max sends of a pending notification before the gateway gives up
pub const MAX_RETRY_SEND: u32 = 10;

/// Interval between hole-punch Ping probes while a connection is
/// still connecting
pub const CONNECTING_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Interval of the per-connection keepalive ticker
pub const PEER_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Interval of the gateway notifier retry sweep
pub const NOTIFY_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// A connection is considered dead when no Pong arrived within
/// two thirds of the keepalive interval.
pub fn keepalive_cutoff() -> Duration {
    PEER_KEEPALIVE_INTERVAL * 2 / 3
}
