//! CBOR (RFC 8949) wire encoding, via `ciborium`.
//!
//! CBOR gives compact integer encoding, self-describing framing, and a
//! `serde`-derived implementation for every type in this crate, so there is
//! no bespoke varint packer here.

use serde::{de::DeserializeOwned, Serialize};

use crate::message::Message;
use crate::{DhtError, Result};

/// Serialize any `serde`-compatible value to a CBOR byte vector.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| DhtError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a CBOR byte slice into any `serde`-compatible value.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| DhtError::Codec(e.to_string()))
}

/// Encode a [`Message`] for the wire.
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    to_vec(message)
}

/// Decode a wire frame into a [`Message`], rejecting it if schema
/// validation fails.
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    let message: Message = from_slice(bytes)?;
    message.validate()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Cacheable, MessageType};
    use crate::node_id::NodeId;

    fn sample() -> Message {
        Message {
            source_id: Some(NodeId::padded(&[0x01])),
            destination_id: NodeId::padded(&[0x02]),
            message_type: MessageType::FindNodes,
            request: true,
            response: false,
            direct: false,
            cacheable: Cacheable::None,
            routing_message: true,
            data: vec![1, 2, 3, 4],
            id: 42,
            hops_to_live: 20,
            route_history: vec![NodeId::padded(&[0x09])],
            relay_id: None,
            relay_connection_id: None,
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let original = sample();
        let bytes = encode_message(&original).expect("encode");
        let decoded = decode_message(&bytes).expect("decode");
        assert_eq!(original, decoded);
    }

    #[test]
    fn decode_rejects_invalid_frame() {
        let mut msg = sample();
        msg.message_type = MessageType::Connect;
        msg.direct = false;
        let bytes = to_vec(&msg).expect("encode");
        assert!(decode_message(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        assert!(decode_message(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
