//! API request/response bodies and the common envelope

use serde::{Deserialize, Serialize};

/// Machine-readable status carried by every API response.
///
/// Encoded as a small integer in JSON; the values are part of the API
/// contract and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum StatusCode {
    Success,
    ServerInternal,
    InvalidVersion,
    VersionTooOld,
    PeerNotFound,
    /// Forward compatibility: codes this client does not know
    Unknown(i32),
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> i32 {
        match code {
            StatusCode::Success => 0,
            StatusCode::ServerInternal => 1,
            StatusCode::InvalidVersion => 2,
            StatusCode::VersionTooOld => 3,
            StatusCode::PeerNotFound => 4,
            StatusCode::Unknown(v) => v,
        }
    }
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        match value {
            0 => StatusCode::Success,
            1 => StatusCode::ServerInternal,
            2 => StatusCode::InvalidVersion,
            3 => StatusCode::VersionTooOld,
            4 => StatusCode::PeerNotFound,
            other => StatusCode::Unknown(other),
        }
    }
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

/// Common part of every API response: `{code, error?, data?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_code")]
    pub code: StatusCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> StatusCode {
    StatusCode::Success
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: StatusCode::Success,
            error: None,
            data: Some(data),
        }
    }

    pub fn failure(code: StatusCode, error: impl Into<String>) -> Self {
        Self {
            code,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// Body of `POST /api/v1/opentunnel`.
///
/// `algorithm`, `nonce` and `cipher` are reserved for data-plane
/// encryption negotiation and are currently ignored by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenTunnelRequest {
    pub version: String,

    #[serde(default)]
    pub algorithm: String,

    #[serde(default)]
    pub nonce: String,

    #[serde(default)]
    pub cipher: String,

    pub source: String,

    pub destination: String,
}

/// Data object of a successful OpenTunnel response. `encrypt` is
/// reserved and currently always empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenTunnelResponse {
    #[serde(default)]
    pub encrypt: String,
}
