//! Node error types

use thiserror::Error;

/// Node-side errors
#[derive(Debug, Error)]
pub enum NodeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TUN device error
    #[error("TUN device error: {0}")]
    Tun(String),

    /// Codec error
    #[error("codec error: {0}")]
    Proto(#[from] wiremesh_proto::ProtoError),

    /// Gateway API error
    #[error("gateway API error: {0}")]
    Api(#[from] wiremesh_api::ApiError),

    /// Local virtual address is not a valid IPv4 address
    #[error("invalid virtual address: {0}")]
    InvalidAddress(String),

    /// Gateway endpoint did not resolve
    #[error("gateway endpoint unreachable: {0}")]
    GatewayUnreachable(String),

    /// Platform not supported
    #[error("platform not supported for this operation")]
    PlatformNotSupported,
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
