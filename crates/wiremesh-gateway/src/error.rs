//! Gateway error types

use thiserror::Error;

/// Gateway-side errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error
    #[error("codec error: {0}")]
    Proto(#[from] wiremesh_proto::ProtoError),

    /// Relay destination is not registered
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// TLS configuration could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
