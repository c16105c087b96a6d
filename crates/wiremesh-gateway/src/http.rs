//! Tunnel broker HTTP endpoint
//!
//! `POST /api/v1/opentunnel` validates the client version, resolves
//! both peers through the registry and hands them to the notifier.
//! Failures are answered with HTTP 200 and a non-Success status code in
//! the envelope; clients treat non-2xx as a transport error.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, error};

use wiremesh_api::{
    ApiError, ApiResponse, OpenTunnelRequest, OpenTunnelResponse, StatusCode, URI_OPEN_TUNNEL,
};
use wiremesh_proto::MAJOR_VERSION;

use crate::notifier::Notifier;
use crate::registry::PeerRegistry;

/// Shared state of the HTTP handlers
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub notifier: Notifier,
    /// Cluster key; reserved, not validated yet
    pub key: String,
}

/// Build the gateway API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(URI_OPEN_TUNNEL, post(open_tunnel))
        .with_state(state)
}

async fn open_tunnel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenTunnelRequest>,
) -> Json<ApiResponse<OpenTunnelResponse>> {
    match handle_open_tunnel(&state, &req).await {
        Ok(data) => {
            debug!(source = %req.source, destination = %req.destination, "open tunnel brokered");
            Json(ApiResponse::success(data))
        }
        Err(e) => {
            error!(
                api = URI_OPEN_TUNNEL,
                source = %req.source,
                destination = %req.destination,
                error = %e,
                "handle HTTP API request failed"
            );
            Json(ApiResponse::failure(e.code(), e.to_string()))
        }
    }
}

async fn handle_open_tunnel(
    state: &AppState,
    req: &OpenTunnelRequest,
) -> Result<OpenTunnelResponse, ApiError> {
    let version = semver::Version::parse(&req.version)
        .map_err(|e| ApiError::status(StatusCode::InvalidVersion, e.to_string()))?;

    if version.major < MAJOR_VERSION {
        return Err(ApiError::status(
            StatusCode::VersionTooOld,
            format!(
                "client version {} doesn't match the server version {}",
                req.version,
                wiremesh_proto::version()
            ),
        ));
    }

    let src = state.registry.lookup(&req.source).ok_or_else(|| {
        ApiError::status(
            StatusCode::PeerNotFound,
            format!("source peer '{}' not found in cache", req.source),
        )
    })?;
    let dst = state.registry.lookup(&req.destination).ok_or_else(|| {
        ApiError::status(
            StatusCode::PeerNotFound,
            format!("destination peer '{}' not found in cache", req.destination),
        )
    })?;

    state.notifier.open_tunnel(&src, &dst);

    Ok(OpenTunnelResponse::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            registry: Arc::new(PeerRegistry::new()),
            notifier: Notifier::new(),
            key: String::new(),
        })
    }

    fn request(version: &str) -> OpenTunnelRequest {
        OpenTunnelRequest {
            version: version.to_string(),
            source: "10.0.0.1".to_string(),
            destination: "10.0.0.2".to_string(),
            ..Default::default()
        }
    }

    fn register(state: &AppState, virt: &str, endpoint: &str) {
        let remote: SocketAddr = endpoint.parse().unwrap();
        state.registry.heartbeat(remote, virt);
    }

    #[tokio::test]
    async fn test_invalid_version_rejected() {
        let state = state();
        let err = handle_open_tunnel(&state, &request("not-a-version"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidVersion);
    }

    #[tokio::test]
    async fn test_old_major_version_rejected() {
        let state = state();
        register(&state, "10.0.0.1", "203.0.113.1:4000");
        register(&state, "10.0.0.2", "203.0.113.2:4001");

        let err = handle_open_tunnel(&state, &request("0.1.0"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::VersionTooOld);
        // No notifications may be enqueued on rejection.
        assert_eq!(state.notifier.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_peers_distinct_errors() {
        let state = state();
        let err = handle_open_tunnel(&state, &request("1.0.2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::PeerNotFound);
        assert!(err.to_string().contains("source"));

        register(&state, "10.0.0.1", "203.0.113.1:4000");
        let err = handle_open_tunnel(&state, &request("1.0.2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[tokio::test]
    async fn test_success_enqueues_two_notifications() {
        let state = state();
        register(&state, "10.0.0.1", "203.0.113.1:4000");
        register(&state, "10.0.0.2", "203.0.113.2:4001");

        handle_open_tunnel(&state, &request("1.0.2")).await.unwrap();
        assert_eq!(state.notifier.pending_len(), 2);
    }
}
