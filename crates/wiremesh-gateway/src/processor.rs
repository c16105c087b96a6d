//! UDP ingress processor
//!
//! Demultiplexes gateway-bound datagrams by their type tag. Unknown
//! tags and packets the gateway has no business with are dropped, not
//! faulted.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use wiremesh_proto::{decode, CtrlHeartbeat, CtrlOpenTunnelAck, CtrlRelay, PacketType};

use crate::error::{GatewayError, GatewayResult};
use crate::notifier::Notifier;
use crate::registry::PeerRegistry;

/// Routes ingress datagrams to the registry and the notifier
pub struct Processor {
    registry: Arc<PeerRegistry>,
    notifier: Notifier,
}

impl Processor {
    pub fn new(registry: Arc<PeerRegistry>, notifier: Notifier) -> Self {
        Self { registry, notifier }
    }

    /// Handle one datagram. Decode failures bubble up so the caller can
    /// log them; they never terminate the ingress loop.
    pub async fn process(&self, remote: SocketAddr, data: &[u8]) -> GatewayResult<()> {
        let Some((&tag, payload)) = data.split_first() else {
            return Err(wiremesh_proto::ProtoError::TooShort.into());
        };

        let packet_type = PacketType::try_from(tag)?;
        match packet_type {
            PacketType::Heartbeat => {
                let heartbeat: CtrlHeartbeat = decode(payload)?;
                self.registry.heartbeat(remote, &heartbeat.virt_address);
            }

            PacketType::OpenTunnelAck => {
                let ack: CtrlOpenTunnelAck = decode(payload)?;
                self.notifier.ack(ack.ack_id);
            }

            PacketType::Relay => {
                let relay: CtrlRelay = decode(payload)?;
                let dst = self
                    .registry
                    .lookup(&relay.virt_address)
                    .ok_or_else(|| GatewayError::PeerNotFound(relay.virt_address.clone()))?;
                self.notifier.relay(dst.udp_address, &relay.data).await;
            }

            other => {
                debug!(packet_type = %other, %remote, "ignoring packet type");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremesh_proto::encode;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn processor() -> (Processor, Arc<PeerRegistry>, Notifier) {
        let registry = Arc::new(PeerRegistry::new());
        let notifier = Notifier::new();
        (
            Processor::new(registry.clone(), notifier.clone()),
            registry,
            notifier,
        )
    }

    #[tokio::test]
    async fn test_heartbeat_upserts_registry() {
        let (processor, registry, _) = processor();
        let frame = encode(
            PacketType::Heartbeat,
            &CtrlHeartbeat {
                virt_address: "10.0.0.1".to_string(),
            },
        )
        .unwrap();

        processor
            .process(addr("203.0.113.1:4000"), &frame)
            .await
            .unwrap();

        let peer = registry.lookup("10.0.0.1").unwrap();
        assert_eq!(peer.udp_address, "203.0.113.1:4000");
    }

    #[tokio::test]
    async fn test_empty_heartbeat_is_silently_ignored() {
        let (processor, registry, _) = processor();
        let frame = encode(
            PacketType::Heartbeat,
            &CtrlHeartbeat {
                virt_address: String::new(),
            },
        )
        .unwrap();

        processor
            .process(addr("203.0.113.1:4000"), &frame)
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tag_is_an_error_not_a_panic() {
        let (processor, _, _) = processor();
        let result = processor.process(addr("203.0.113.1:4000"), &[0xAB, 1, 2]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_relay_to_unknown_peer_is_dropped() {
        let (processor, _, _) = processor();
        let frame = encode(
            PacketType::Relay,
            &CtrlRelay {
                virt_address: "10.0.0.9".to_string(),
                data: vec![1, 2, 3],
            },
        )
        .unwrap();

        let result = processor.process(addr("203.0.113.1:4000"), &frame).await;
        assert!(matches!(result, Err(GatewayError::PeerNotFound(_))));
    }
}
