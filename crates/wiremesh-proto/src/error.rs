//! Protocol error types

use thiserror::Error;

/// Codec-level errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Message serialization failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload did not match the schema for its tag
    #[error("decode error: {0}")]
    Decode(String),

    /// Byte 0 is not a known packet type
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// Datagram shorter than the one-byte header
    #[error("datagram too short")]
    TooShort,
}

/// Result type for codec operations
pub type ProtoResult<T> = Result<T, ProtoError>;
