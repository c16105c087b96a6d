//! Gateway server entry point
//!
//! One UDP socket shared by the ingress loop and the notifier workers,
//! plus the HTTP broker on the same port number (TCP). TLS is selected
//! by the presence of certificate/key paths.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{error, info};

use wiremesh_proto::constants::MAX_BUFFER_SIZE;

use crate::error::{GatewayError, GatewayResult};
use crate::http::{router, AppState};
use crate::notifier::Notifier;
use crate::processor::Processor;
use crate::registry::PeerRegistry;

/// Gateway CLI options
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    /// Notifier worker pool size
    pub concurrency: usize,
    /// Cluster key used to validate peers; reserved, not enforced yet
    pub key: String,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2823,
            concurrency: 128,
            key: String::new(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Serve the gateway until the process is stopped. Startup failures
/// (UDP bind, TCP bind, TLS material) are fatal; everything after that
/// is logged and survived.
pub async fn serve(opt: Options) -> GatewayResult<()> {
    let bind_addr: SocketAddr = format!("{}:{}", opt.host, opt.port)
        .parse()
        .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!(port = opt.port, "listen UDP successfully");

    let registry = Arc::new(PeerRegistry::new());
    let notifier = Notifier::new();
    let processor = Processor::new(registry.clone(), notifier.clone());

    tokio::spawn(notifier.clone().run(socket.clone(), opt.concurrency));

    // TLS material is loaded up front: a bad certificate or key is a
    // fatal startup error, not something to limp along without.
    let tls = match (&opt.tls_cert, &opt.tls_key) {
        (Some(cert), Some(key)) => Some(
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| GatewayError::Tls(e.to_string()))?,
        ),
        _ => None,
    };

    let state = Arc::new(AppState {
        registry,
        notifier,
        key: opt.key.clone(),
    });
    tokio::spawn(serve_http(bind_addr, tls, state));

    ingress_loop(socket, processor).await
}

async fn serve_http(
    addr: SocketAddr,
    tls: Option<axum_server::tls_rustls::RustlsConfig>,
    state: Arc<AppState>,
) {
    let app = router(state);

    let result = match tls {
        Some(tls) => {
            info!(%addr, "serving HTTPS API");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(%addr, "serving HTTP API");
            axum_server::bind(addr).serve(app.into_make_service()).await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "HTTP server exited");
    }
}

async fn ingress_loop(socket: Arc<UdpSocket>, processor: Processor) -> GatewayResult<()> {
    let mut buffer = [0u8; MAX_BUFFER_SIZE];
    loop {
        let (n, remote) = match socket.recv_from(&mut buffer).await {
            Ok(read) => read,
            Err(e) => {
                error!(error = %e, "read UDP packet failed");
                continue;
            }
        };

        if n < 1 {
            error!(%remote, "read invalid packet");
            continue;
        }

        if let Err(e) = processor.process(remote, &buffer[..n]).await {
            error!(%remote, error = %e, "process message failed");
        }
    }
}
