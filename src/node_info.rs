//! Peer records held by the routing table.

use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;

/// Opaque connection identifier assigned by the transport for an established
/// link. Distinct from the peer's [`NodeId`]; never consulted for proximity.
pub type ConnectionId = NodeId;

/// Opaque public key bytes, consumed as an opaque value by this crate.
///
/// Verification of ownership happens outside the routing core (at the
/// transport / handshake layer); the core only needs public keys to enforce
/// per-peer uniqueness.
pub type PublicKey = [u8; 32];

/// An immutable peer record.
///
/// Created on admission to a routing table, never mutated afterwards, and
/// destroyed on eviction or explicit drop. `bucket_index` is derived once,
/// at construction time, from the owning table's local id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The peer's 512-bit identifier.
    pub node_id: NodeId,
    /// The peer's public key, used only for uniqueness checks by this crate.
    pub public_key: PublicKey,
    /// Opaque connection identifier assigned by the transport for this link.
    pub connection_id: ConnectionId,
    /// Bucket index relative to the owning table's local id, i.e.
    /// `NodeId::common_leading_bits(self_id, node_id)`.
    pub bucket_index: usize,
    /// `true` if this peer does not route for others (a "client" node).
    pub client_mode: bool,
}

impl NodeInfo {
    /// Build a `NodeInfo`, deriving `bucket_index` from `local_id`.
    pub fn new(
        local_id: &NodeId,
        node_id: NodeId,
        public_key: PublicKey,
        connection_id: ConnectionId,
        client_mode: bool,
    ) -> Self {
        let bucket_index = NodeId::common_leading_bits(local_id, &node_id);
        Self {
            node_id,
            public_key,
            connection_id,
            bucket_index,
            client_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_derived_from_local_id() {
        let local = NodeId::ZERO;
        let mut far = [0u8; 64];
        far[0] = 0x80;
        let peer = NodeInfo::new(
            &local,
            NodeId::from_bytes(far),
            [0u8; 32],
            NodeId::padded(&[1]),
            false,
        );
        assert_eq!(peer.bucket_index, 0);
    }
}
