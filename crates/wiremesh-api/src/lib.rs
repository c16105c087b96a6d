//! Gateway HTTP API
//!
//! The response envelope, status codes, request/response bodies and the
//! node-side client for the gateway's tunnel brokering endpoint.

pub mod client;
pub mod error;
pub mod types;

pub use client::ApiClient;
pub use error::{ApiError, ApiResult};
pub use types::{ApiResponse, OpenTunnelRequest, OpenTunnelResponse, StatusCode};

/// Path of the tunnel brokering endpoint
pub const URI_OPEN_TUNNEL: &str = "/api/v1/opentunnel";
