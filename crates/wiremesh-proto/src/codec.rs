//! Byte-0-tag codec
//!
//! Wire format: `[type: 1 byte][payload]`. Structured payloads are
//! bincode-encoded; Data payloads are raw bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtoError, ProtoResult};
use crate::packet::PacketType;

/// Encode a structured control message behind its packet type tag.
pub fn encode<T: Serialize>(typ: PacketType, msg: &T) -> ProtoResult<Bytes> {
    let payload = bincode::serialize(msg).map_err(|e| ProtoError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(typ as u8);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Frame a raw IPv4 packet as a Data datagram.
pub fn encode_raw(frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + frame.len());
    buf.put_u8(PacketType::Data as u8);
    buf.put_slice(frame);
    buf.freeze()
}

/// Decode a structured payload (the bytes after the tag).
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> ProtoResult<T> {
    bincode::deserialize(payload).map_err(|e| ProtoError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CtrlOpenTunnelAck, CtrlPong};

    #[test]
    fn test_encode_prepends_tag() {
        let frame = encode(PacketType::OpenTunnelAck, &CtrlOpenTunnelAck { ack_id: 7 }).unwrap();
        assert_eq!(frame[0], PacketType::OpenTunnelAck as u8);
        let ack: CtrlOpenTunnelAck = decode(&frame[1..]).unwrap();
        assert_eq!(ack.ack_id, 7);
    }

    #[test]
    fn test_encode_raw() {
        let frame = encode_raw(&[1, 2, 3]);
        assert_eq!(&frame[..], &[PacketType::Data as u8, 1, 2, 3]);
    }

    #[test]
    fn test_decode_truncated_payload() {
        let frame = encode(PacketType::Pong, &CtrlPong::new("10.0.0.1")).unwrap();
        let result: crate::ProtoResult<CtrlPong> = decode(&frame[1..frame.len() / 2]);
        assert!(result.is_err());
    }
}
