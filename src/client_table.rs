//! Asymmetric admission table for non-routing ("client") peers.
//!
//! A vault keeps one [`ClientRoutingTable`] alongside its
//! [`crate::routing_table::RoutingTable`]. Clients are never consulted for
//! forwarding decisions; they are held only so the vault can deliver
//! messages directly to them (or relay on their behalf).

use std::sync::Mutex;

use tracing::{debug, info};

use crate::node_id::NodeId;
use crate::node_info::{ConnectionId, NodeInfo};

struct Inner {
    entries: Vec<NodeInfo>,
}

/// Holds client peers admitted within the owner's current horizon.
///
/// The horizon is supplied by the caller on every admission attempt (it is
/// the owner's main routing table's `nth_closest(self, 2*G)`); this table
/// does not compute it itself, since only the owning routing table knows
/// its own membership.
pub struct ClientRoutingTable {
    owner_id: NodeId,
    inner: Mutex<Inner>,
}

impl ClientRoutingTable {
    /// Construct an empty client table for `owner_id`.
    pub fn new(owner_id: NodeId) -> Self {
        ClientRoutingTable {
            owner_id,
            inner: Mutex::new(Inner { entries: Vec::new() }),
        }
    }

    /// Number of admitted clients.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("client table mutex poisoned").entries.len()
    }

    /// Attempt to admit `peer`, given the owner's current `horizon`
    /// (`nth_closest(owner_id, 2*closest_nodes_size)`).
    ///
    /// Admitted iff `peer.node_id` is strictly XOR-closer to `owner_id`
    /// than `horizon` is, and `peer` does not duplicate an existing entry
    /// by `node_id`, `connection_id`, or `public_key`.
    pub fn add_node(&self, peer: NodeInfo, horizon: NodeId) -> bool {
        if peer.node_id == self.owner_id || peer.connection_id.is_zero() {
            return false;
        }
        let peer_dist = peer.node_id.distance(&self.owner_id);
        let horizon_dist = horizon.distance(&self.owner_id);
        if peer_dist.as_bytes() >= horizon_dist.as_bytes() {
            debug!(peer = %peer.node_id, "client outside horizon, rejecting");
            return false;
        }

        let mut inner = self.inner.lock().expect("client table mutex poisoned");
        let duplicate = inner.entries.iter().any(|e| {
            e.node_id == peer.node_id
                || e.connection_id == peer.connection_id
                || e.public_key == peer.public_key
        });
        if duplicate {
            return false;
        }
        inner.entries.push(peer.clone());
        info!(peer = %peer.node_id, size = inner.entries.len(), "admitted client");
        true
    }

    /// Remove the client entry for `id`, returning it if present.
    pub fn drop_node(&self, id: &NodeId) -> Option<NodeInfo> {
        let mut inner = self.inner.lock().expect("client table mutex poisoned");
        let pos = inner.entries.iter().position(|e| &e.node_id == id)?;
        let removed = inner.entries.remove(pos);
        debug!(peer = %removed.node_id, "dropped client");
        Some(removed)
    }

    /// Look up an admitted client by identifier.
    pub fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        let inner = self.inner.lock().expect("client table mutex poisoned");
        inner.entries.iter().find(|e| &e.node_id == id).cloned()
    }

    /// `true` iff `connection_id` belongs to an admitted client.
    pub fn contains_connection(&self, connection_id: &ConnectionId) -> bool {
        let inner = self.inner.lock().expect("client table mutex poisoned");
        inner.entries.iter().any(|e| &e.connection_id == connection_id)
    }

    /// All admitted clients, in admission order.
    pub fn entries(&self) -> Vec<NodeInfo> {
        self.inner.lock().expect("client table mutex poisoned").entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(owner: &NodeId, id_byte: u8) -> NodeInfo {
        NodeInfo::new(owner, NodeId::padded(&[id_byte]), [id_byte; 32], NodeId::padded(&[id_byte, 0xAA]), true)
    }

    #[test]
    fn admits_within_horizon_rejects_outside() {
        let owner = NodeId::ZERO;
        let table = ClientRoutingTable::new(owner);
        let horizon = NodeId::padded(&[0x10]);

        assert!(table.add_node(client(&owner, 0x01), horizon));
        assert!(!table.add_node(client(&owner, 0x20), horizon));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn rejects_duplicate_node_id() {
        let owner = NodeId::ZERO;
        let table = ClientRoutingTable::new(owner);
        let horizon = NodeId::padded(&[0x10]);
        assert!(table.add_node(client(&owner, 0x01), horizon));
        assert!(!table.add_node(client(&owner, 0x01), horizon));
    }

    #[test]
    fn drop_and_lookup() {
        let owner = NodeId::ZERO;
        let table = ClientRoutingTable::new(owner);
        let horizon = NodeId::padded(&[0x10]);
        assert!(table.add_node(client(&owner, 0x01), horizon));
        assert!(table.get(&NodeId::padded(&[0x01])).is_some());
        assert!(table.drop_node(&NodeId::padded(&[0x01])).is_some());
        assert!(table.get(&NodeId::padded(&[0x01])).is_none());
    }
}
