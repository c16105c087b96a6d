//! Node-side client for the gateway HTTP API

use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::types::{ApiResponse, OpenTunnelRequest, OpenTunnelResponse};
use crate::URI_OPEN_TUNNEL;

/// Client for the gateway's HTTP endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    gateway: String,
    key: String,
    tls: bool,
}

impl ApiClient {
    /// `gateway` is the `host:port` of the gateway server; `key` is the
    /// cluster key (currently not validated by the gateway).
    pub fn new(gateway: impl Into<String>, key: impl Into<String>, tls: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            gateway: gateway.into(),
            key: key.into(),
            tls,
        }
    }

    /// Ask the gateway to open a tunnel between the two peers. Both
    /// sides are identified by their virtual addresses.
    pub async fn open_tunnel(&self, source: &str, destination: &str) -> ApiResult<()> {
        let req = OpenTunnelRequest {
            version: wiremesh_proto::version().to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            ..Default::default()
        };

        let _res: OpenTunnelResponse = self.post(URI_OPEN_TUNNEL, &req).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.gateway, path)
    }

    async fn post<Req, Res>(&self, path: &str, body: &Req) -> ApiResult<Res>
    where
        Req: serde::Serialize,
        Res: serde::de::DeserializeOwned + Default,
    {
        let url = self.url(path);
        debug!(%url, "POST gateway API");

        let response = self
            .http
            .post(&url)
            .header("x-wiremesh-key", &self.key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Transport(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let envelope: ApiResponse<Res> = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        if !envelope.code.is_success() {
            return Err(ApiError::status(
                envelope.code,
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(envelope.data.unwrap_or_default())
    }
}
