//! End-to-end rendezvous tests
//!
//! Drives a real gateway (UDP ingress + HTTP broker) and two nodes over
//! loopback, with in-memory TUN doubles standing in for the kernel
//! devices. Exercises heartbeat registration, tunnel brokering,
//! relay fallback / hole-punch delivery and version rejection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use wiremesh_api::{ApiResponse, OpenTunnelRequest, OpenTunnelResponse, StatusCode};
use wiremesh_gateway::http::{router, AppState};
use wiremesh_gateway::{Notifier, PeerRegistry, Processor};
use wiremesh_node::error::{NodeError, NodeResult};
use wiremesh_node::{Node, Options, TunDevice};

/// In-memory TUN double: the test injects frames the node "reads" and
/// observes frames the node "writes".
struct TestTun {
    ingress: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    egress: mpsc::Sender<Bytes>,
}

#[async_trait]
impl TunDevice for TestTun {
    async fn read(&self) -> NodeResult<Bytes> {
        match self.ingress.lock().await.recv().await {
            Some(frame) => Ok(frame),
            // Park forever instead of erroring so the pump never spins.
            None => std::future::pending().await,
        }
    }

    async fn write(&self, frame: &[u8]) -> NodeResult<()> {
        self.egress
            .send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| NodeError::Tun("egress closed".to_string()))
    }

    fn name(&self) -> &str {
        "testtun0"
    }

    fn mtu(&self) -> u16 {
        1500
    }
}

fn test_tun() -> (Arc<TestTun>, mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    let (ingress_tx, ingress_rx) = mpsc::channel(64);
    let (egress_tx, egress_rx) = mpsc::channel(64);
    let tun = Arc::new(TestTun {
        ingress: tokio::sync::Mutex::new(ingress_rx),
        egress: egress_tx,
    });
    (tun, ingress_tx, egress_rx)
}

/// A gateway wired exactly like production, on loopback ephemeral
/// ports, with its registry and notifier exposed for assertions.
struct GatewayFixture {
    endpoint: String,
    registry: Arc<PeerRegistry>,
    notifier: Notifier,
}

async fn start_gateway() -> GatewayFixture {
    // The HTTP listener picks the port; UDP binds the same number so
    // one endpoint string serves both planes, as in production.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let socket = Arc::new(
        UdpSocket::bind(("127.0.0.1", port))
            .await
            .expect("UDP port mirroring the HTTP port should be free"),
    );

    let registry = Arc::new(PeerRegistry::new());
    let notifier = Notifier::new();
    tokio::spawn(notifier.clone().run(socket.clone(), 4));

    let processor = Processor::new(registry.clone(), notifier.clone());
    let ingress_socket = socket.clone();
    tokio::spawn(async move {
        let mut buffer = [0u8; 4096];
        loop {
            let Ok((n, remote)) = ingress_socket.recv_from(&mut buffer).await else {
                continue;
            };
            if n < 1 {
                continue;
            }
            let _ = processor.process(remote, &buffer[..n]).await;
        }
    });

    let state = Arc::new(AppState {
        registry: registry.clone(),
        notifier: notifier.clone(),
        key: String::new(),
    });
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    GatewayFixture {
        endpoint: format!("127.0.0.1:{}", port),
        registry,
        notifier,
    }
}

struct NodeFixture {
    node: Arc<Node>,
    tun_in: mpsc::Sender<Bytes>,
    tun_out: mpsc::Receiver<Bytes>,
}

fn start_node(gateway: &str, address: &str) -> NodeFixture {
    let node = Arc::new(Node::new(Options {
        gateway: gateway.to_string(),
        key: String::new(),
        address: address.to_string(),
        tls: false,
    }));

    let (tun, tun_in, tun_out) = test_tun();
    let serving = node.clone();
    tokio::spawn(async move {
        let _ = serving.serve_with_device(tun).await;
    });

    NodeFixture { node, tun_in, tun_out }
}

/// Minimal IPv4 frame: 20-byte header plus payload.
fn ipv4_frame(src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Bytes {
    let total = 20 + payload.len();
    let mut frame = vec![0u8; total];
    frame[0] = 0x45;
    frame[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    frame[8] = 64;
    frame[12..16].copy_from_slice(&src);
    frame[16..20].copy_from_slice(&dst);
    frame[20..].copy_from_slice(payload);
    Bytes::from(frame)
}

async fn wait_for_registration(fixture: &GatewayFixture, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while fixture.registry.len() < expected {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("peers should heartbeat within the timeout");
}

/// Keep offering the frame on A's TUN until B's TUN spits it out;
/// the first offers are dropped while the tunnel is brokered.
async fn deliver(
    from: &mpsc::Sender<Bytes>,
    to: &mut mpsc::Receiver<Bytes>,
    frame: Bytes,
    payload: &[u8],
) -> Bytes {
    timeout(Duration::from_secs(5), async {
        loop {
            from.send(frame.clone()).await.unwrap();
            match timeout(Duration::from_millis(150), to.recv()).await {
                Ok(Some(received)) if received.ends_with(payload) => return received,
                _ => continue,
            }
        }
    })
    .await
    .expect("frame should reach the destination TUN")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rendezvous_relay_and_direct_delivery() {
    let gateway = start_gateway().await;

    let mut a = start_node(&gateway.endpoint, "10.77.0.1");
    let mut b = start_node(&gateway.endpoint, "10.77.0.2");
    wait_for_registration(&gateway, 2).await;

    // First traffic A -> B triggers OpenTunnel brokering; the frame
    // arrives via relay or, once punched, directly.
    let frame = ipv4_frame([10, 77, 0, 1], [10, 77, 0, 2], b"hello-b");
    let received = deliver(&a.tun_in, &mut b.tun_out, frame, b"hello-b").await;
    assert!(wiremesh_node::tun::ip::is_ipv4(&received));

    // Both tunnels acknowledge: the retry map drains within a couple
    // of retry ticks.
    timeout(Duration::from_secs(2), async {
        while gateway.notifier.pending_len() > 0 {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("acks should drain the retry map");

    // Reverse direction works over the punched pair as well.
    let frame = ipv4_frame([10, 77, 0, 2], [10, 77, 0, 1], b"hello-a");
    deliver(&b.tun_in, &mut a.tun_out, frame, b"hello-a").await;

    a.node.stop();
    b.node.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loopback_frame_returns_unchanged() {
    let gateway = start_gateway().await;
    let mut a = start_node(&gateway.endpoint, "10.77.0.1");
    wait_for_registration(&gateway, 1).await;

    let frame = ipv4_frame([10, 77, 0, 1], [10, 77, 0, 1], b"to-self");
    a.tun_in.send(frame.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(2), a.tun_out.recv())
        .await
        .expect("loopback frame should come back")
        .unwrap();
    assert_eq!(received, frame);

    a.node.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_out_of_subnet_frame_is_dropped() {
    let gateway = start_gateway().await;
    let mut a = start_node(&gateway.endpoint, "10.77.0.1");
    wait_for_registration(&gateway, 1).await;

    let frame = ipv4_frame([10, 77, 0, 1], [8, 8, 8, 8], b"outside");
    a.tun_in.send(frame).await.unwrap();

    // Nothing comes back out and no tunnel is brokered.
    assert!(timeout(Duration::from_millis(300), a.tun_out.recv())
        .await
        .is_err());
    assert_eq!(gateway.notifier.pending_len(), 0);

    a.node.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_client_version_is_rejected() {
    let gateway = start_gateway().await;
    let a = start_node(&gateway.endpoint, "10.77.0.1");
    let b = start_node(&gateway.endpoint, "10.77.0.2");
    wait_for_registration(&gateway, 2).await;

    let body = OpenTunnelRequest {
        version: "0.1.0".to_string(),
        source: "10.77.0.1".to_string(),
        destination: "10.77.0.2".to_string(),
        ..Default::default()
    };
    let response: ApiResponse<OpenTunnelResponse> = reqwest::Client::new()
        .post(format!("http://{}/api/v1/opentunnel", gateway.endpoint))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response.code, StatusCode::VersionTooOld);
    // Rejected requests must not enqueue notifications.
    assert_eq!(gateway.notifier.pending_len(), 0);

    a.node.stop();
    b.node.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_open_tunnel_is_idempotent() {
    let gateway = start_gateway().await;
    let mut a = start_node(&gateway.endpoint, "10.77.0.1");
    let mut b = start_node(&gateway.endpoint, "10.77.0.2");
    wait_for_registration(&gateway, 2).await;

    let frame = ipv4_frame([10, 77, 0, 1], [10, 77, 0, 2], b"first");
    deliver(&a.tun_in, &mut b.tun_out, frame, b"first").await;

    // A second brokered OpenTunnel for the same pair: the nodes ack it
    // against their existing connections and traffic keeps flowing.
    let body = OpenTunnelRequest {
        version: wiremesh_proto::version().to_string(),
        source: "10.77.0.1".to_string(),
        destination: "10.77.0.2".to_string(),
        ..Default::default()
    };
    let response: ApiResponse<OpenTunnelResponse> = reqwest::Client::new()
        .post(format!("http://{}/api/v1/opentunnel", gateway.endpoint))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.code.is_success());

    timeout(Duration::from_secs(2), async {
        while gateway.notifier.pending_len() > 0 {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("duplicate notifications should be acked");

    let frame = ipv4_frame([10, 77, 0, 1], [10, 77, 0, 2], b"second");
    deliver(&a.tun_in, &mut b.tun_out, frame, b"second").await;

    a.node.stop();
    b.node.stop();
}
