//! Bounded peer set with admission policy, proximity queries, and
//! close-group change notification.
//!
//! One [`RoutingTable`] per vault node. All entries are protected by a
//! single exclusive lock; callbacks are always invoked with that lock
//! released, so a callback may safely call back into the table.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::node_id::NodeId;
use crate::node_info::{ConnectionId, NodeInfo};
use crate::{G, K_MAX};

/// Invoked whenever the table's size changes, with the new size.
pub type NetworkStatusFn = Box<dyn Fn(usize) + Send + Sync>;

/// Invoked whenever an entry leaves the table, with the departing record
/// and whether the departure was routing-table-only (the peer may still
/// be known to a [`crate::client_table::ClientRoutingTable`]).
pub type RemoveNodeFn = Box<dyn Fn(&NodeInfo, bool) + Send + Sync>;

/// Invoked whenever the close group's membership changes, with the new
/// group's identifiers in increasing-distance order.
pub type CloseNodeReplacedFn = Box<dyn Fn(&[NodeId]) + Send + Sync>;

/// Invoked whenever the furthest close-group member changes, with its
/// new identifier.
pub type RemoveFurthestFn = Box<dyn Fn(&NodeId) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    network_status: Option<NetworkStatusFn>,
    remove_node: Option<RemoveNodeFn>,
    close_node_replaced: Option<CloseNodeReplacedFn>,
    remove_furthest: Option<RemoveFurthestFn>,
}

struct Entry {
    info: NodeInfo,
    /// Monotonic admission order, used only to break make-space ties.
    insertion_seq: u64,
}

struct Inner {
    entries: Vec<Entry>,
    next_seq: u64,
    close_group: Vec<NodeId>,
    furthest_group_node_id: NodeId,
}

impl Inner {
    fn new() -> Self {
        Inner {
            entries: Vec::new(),
            next_seq: 0,
            close_group: Vec::new(),
            furthest_group_node_id: NodeId::MAX,
        }
    }

    fn sorted_by_distance(&self, target: &NodeId) -> Vec<&Entry> {
        let mut v: Vec<&Entry> = self.entries.iter().collect();
        v.sort_by(|a, b| {
            a.info
                .node_id
                .distance(target)
                .as_bytes()
                .cmp(b.info.node_id.distance(target).as_bytes())
        });
        v
    }

    fn close_group_ids(&self, self_id: &NodeId) -> Vec<NodeId> {
        self.sorted_by_distance(self_id)
            .into_iter()
            .take(G)
            .map(|e| e.info.node_id)
            .collect()
    }

    fn bucket_occupancy(&self, bucket_index: usize) -> usize {
        self.entries
            .iter()
            .filter(|e| e.info.bucket_index == bucket_index)
            .count()
    }

    fn contains_node_id(&self, id: &NodeId) -> bool {
        self.entries.iter().any(|e| &e.info.node_id == id)
    }

    fn contains_connection_id(&self, id: &ConnectionId) -> bool {
        self.entries.iter().any(|e| &e.info.connection_id == id)
    }

    fn contains_public_key(&self, key: &[u8; 32]) -> bool {
        self.entries.iter().any(|e| &e.info.public_key == key)
    }
}

/// Bounded peer set for a vault (routing-capable) node.
///
/// See the crate-level invariants: maximum size [`K_MAX`], close-group
/// size [`G`], uniqueness on `node_id`/`connection_id`/`public_key`, and
/// self-exclusion.
pub struct RoutingTable {
    self_id: NodeId,
    client_mode: bool,
    inner: Mutex<Inner>,
    callbacks: Mutex<Callbacks>,
}

impl RoutingTable {
    /// Construct an empty table for `self_id`.
    pub fn new(self_id: NodeId, client_mode: bool) -> Self {
        RoutingTable {
            self_id,
            client_mode,
            inner: Mutex::new(Inner::new()),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    /// Install the four lifecycle callbacks. Intended to be called once,
    /// before the table is exposed to traffic.
    pub fn set_callbacks(
        &self,
        network_status: NetworkStatusFn,
        remove_node: RemoveNodeFn,
        close_node_replaced: CloseNodeReplacedFn,
        remove_furthest: RemoveFurthestFn,
    ) {
        let mut cb = self.callbacks.lock().expect("callbacks mutex poisoned");
        cb.network_status = Some(network_status);
        cb.remove_node = Some(remove_node);
        cb.close_node_replaced = Some(close_node_replaced);
        cb.remove_furthest = Some(remove_furthest);
    }

    /// The identifier this table is keyed on.
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// `true` if this table belongs to a non-routing client.
    pub fn client_mode(&self) -> bool {
        self.client_mode
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("routing table mutex poisoned").entries.len()
    }

    fn would_admit(&self, inner: &Inner, peer: &NodeInfo) -> bool {
        if peer.node_id == self.self_id {
            return false;
        }
        if peer.connection_id.is_zero() {
            return false;
        }
        if inner.contains_node_id(&peer.node_id) || inner.contains_connection_id(&peer.connection_id) {
            return false;
        }
        if inner.contains_public_key(&peer.public_key) {
            return false;
        }
        true
    }

    /// Returns what [`Self::add_node`] would return, without mutating state.
    pub fn check_node(&self, peer: &NodeInfo) -> bool {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        if !self.would_admit(&inner, peer) {
            return false;
        }
        if inner.entries.len() < K_MAX {
            return true;
        }
        self.find_eviction_victim(&inner, peer).is_some()
    }

    /// Find the make-space eviction victim for `peer`, if one exists.
    ///
    /// Candidates are entries outside the current close group, occupying a
    /// bucket at least as close to self as `peer`'s bucket (i.e. not an
    /// improvement in diversity by themselves), whose own bucket is more
    /// crowded than the bucket `peer` would occupy. Among equally-inferior
    /// candidates the furthest-from-self wins; remaining ties are broken by
    /// evicting the more recently admitted entry, minimizing churn on
    /// long-lived peers.
    fn find_eviction_victim<'a>(&self, inner: &'a Inner, peer: &NodeInfo) -> Option<&'a Entry> {
        let close_group = inner.close_group_ids(&self.self_id);
        let peer_bucket_occupancy = inner.bucket_occupancy(peer.bucket_index);

        let mut best: Option<&Entry> = None;
        for entry in &inner.entries {
            if close_group.contains(&entry.info.node_id) {
                continue;
            }
            if entry.info.bucket_index < peer.bucket_index {
                // Victim's bucket is rarer than peer's: evicting it would
                // make diversity worse, not better.
                continue;
            }
            let victim_bucket_occupancy = inner.bucket_occupancy(entry.info.bucket_index);
            if victim_bucket_occupancy <= peer_bucket_occupancy {
                // Peer's own bucket isn't under-represented relative to
                // the victim's: no diversity gain from the swap.
                continue;
            }
            best = Some(match best {
                None => entry,
                Some(current) => {
                    let entry_dist = entry.info.node_id.distance(&self.self_id);
                    let current_dist = current.info.node_id.distance(&self.self_id);
                    if entry_dist.as_bytes() > current_dist.as_bytes() {
                        entry
                    } else if entry_dist.as_bytes() < current_dist.as_bytes() {
                        current
                    } else if entry.insertion_seq > current.insertion_seq {
                        entry
                    } else {
                        current
                    }
                }
            });
        }
        best
    }

    /// Attempt to admit `peer`. Returns `true` on success.
    pub fn add_node(&self, peer: NodeInfo) -> bool {
        let (accepted, evicted, new_size, group_changed, new_group, furthest_changed, new_furthest) = {
            let mut inner = self.inner.lock().expect("routing table mutex poisoned");
            if !self.would_admit(&inner, &peer) {
                return false;
            }

            let mut evicted = None;
            if inner.entries.len() >= K_MAX {
                let victim_id = match self.find_eviction_victim(&inner, &peer) {
                    Some(v) => v.info.node_id,
                    None => {
                        debug!(peer = %peer.node_id, "routing table full, no eviction victim, rejecting");
                        return false;
                    }
                };
                let pos = inner
                    .entries
                    .iter()
                    .position(|e| e.info.node_id == victim_id)
                    .expect("eviction victim vanished under lock");
                evicted = Some(inner.entries.remove(pos).info);
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push(Entry {
                info: peer.clone(),
                insertion_seq: seq,
            });

            let new_group = inner.close_group_ids(&self.self_id);
            let group_changed = new_group != inner.close_group;
            inner.close_group = new_group.clone();

            let new_furthest = new_group.last().copied().unwrap_or(NodeId::MAX);
            let furthest_changed = new_furthest != inner.furthest_group_node_id;
            inner.furthest_group_node_id = new_furthest;

            (
                true,
                evicted,
                inner.entries.len(),
                group_changed,
                new_group,
                furthest_changed,
                new_furthest,
            )
        };

        if !accepted {
            return false;
        }

        if let Some(victim) = &evicted {
            warn!(victim = %victim.node_id, incoming = %peer.node_id, "evicted peer to make space");
            self.invoke_remove_node(victim, false);
        }
        info!(peer = %peer.node_id, size = new_size, "admitted peer to routing table");
        self.invoke_network_status(new_size);
        if group_changed {
            self.invoke_close_node_replaced(&new_group);
        }
        if furthest_changed {
            self.invoke_remove_furthest(&new_furthest);
        }
        true
    }

    /// Remove the entry for `id`, returning it if present.
    pub fn drop_node(&self, id: &NodeId, routing_only: bool) -> Option<NodeInfo> {
        let (removed, new_size, group_changed, new_group, furthest_changed, new_furthest) = {
            let mut inner = self.inner.lock().expect("routing table mutex poisoned");
            let pos = inner.entries.iter().position(|e| &e.info.node_id == id)?;
            let removed = inner.entries.remove(pos).info;

            let new_group = inner.close_group_ids(&self.self_id);
            let group_changed = new_group != inner.close_group;
            inner.close_group = new_group.clone();

            let new_furthest = new_group.last().copied().unwrap_or(NodeId::MAX);
            let furthest_changed = new_furthest != inner.furthest_group_node_id;
            inner.furthest_group_node_id = new_furthest;

            (
                removed,
                inner.entries.len(),
                group_changed,
                new_group,
                furthest_changed,
                new_furthest,
            )
        };

        debug!(peer = %removed.node_id, routing_only, "dropped peer from routing table");
        self.invoke_remove_node(&removed, routing_only);
        self.invoke_network_status(new_size);
        if group_changed {
            self.invoke_close_node_replaced(&new_group);
        }
        if furthest_changed {
            self.invoke_remove_furthest(&new_furthest);
        }
        Some(removed)
    }

    /// The entry with smallest XOR distance to `target`, optionally
    /// excluding identifiers already visited (e.g. a message's
    /// `route_history`) and optionally excluding an exact
    /// `node_id == target` match.
    pub fn closest_node(
        &self,
        target: &NodeId,
        exclude: &HashSet<NodeId>,
        ignore_exact_match: bool,
    ) -> Option<NodeInfo> {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        inner
            .sorted_by_distance(target)
            .into_iter()
            .find(|e| {
                !exclude.contains(&e.info.node_id)
                    && !(ignore_exact_match && &e.info.node_id == target)
            })
            .map(|e| e.info.clone())
    }

    /// The `n`-th closest identifier to `target`, or [`NodeId::MAX`] if the
    /// table has fewer than `n` entries.
    pub fn nth_closest(&self, target: &NodeId, n: usize) -> NodeId {
        if n == 0 {
            return NodeId::MAX;
        }
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        inner
            .sorted_by_distance(target)
            .get(n - 1)
            .map(|e| e.info.node_id)
            .unwrap_or(NodeId::MAX)
    }

    /// Up to `n` identifiers closest to `target`, in increasing-distance order.
    pub fn closest_nodes(&self, target: &NodeId, n: usize) -> Vec<NodeId> {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        inner
            .sorted_by_distance(target)
            .into_iter()
            .take(n)
            .map(|e| e.info.node_id)
            .collect()
    }

    /// `true` iff no table entry is strictly closer to `target` than `self`.
    pub fn is_closest_to(&self, target: &NodeId, ignore_exact_match: bool) -> bool {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        !inner.entries.iter().any(|e| {
            if ignore_exact_match && &e.info.node_id == target {
                return false;
            }
            NodeId::closer_to_target(&e.info.node_id, &self.self_id, target)
        })
    }

    /// `true` iff `target`'s distance to `self` is ≤ the distance from
    /// `self` to the `range`-th closest peer.
    pub fn is_in_range(&self, target: &NodeId, range: usize) -> bool {
        let boundary = self.nth_closest(&self.self_id, range);
        let target_dist = target.distance(&self.self_id);
        let boundary_dist = boundary.distance(&self.self_id);
        target_dist.as_bytes() <= boundary_dist.as_bytes()
    }

    /// `true` iff both `a` and `b` are among the `G` closest entries to `self`.
    pub fn confirm_group_members(&self, a: &NodeId, b: &NodeId) -> bool {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        let group = inner.close_group_ids(&self.self_id);
        group.contains(a) && group.contains(b)
    }

    /// A peer outside the close group, preferring the furthest-from-self,
    /// skipping any whose `connection_id` is in `attempted`.
    pub fn removable_node(&self, attempted: &HashSet<ConnectionId>) -> Option<NodeInfo> {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        let close_group = inner.close_group_ids(&self.self_id);
        inner
            .entries
            .iter()
            .filter(|e| !close_group.contains(&e.info.node_id))
            .filter(|e| !attempted.contains(&e.info.connection_id))
            .max_by(|a, b| {
                a.info
                    .node_id
                    .distance(&self.self_id)
                    .as_bytes()
                    .cmp(b.info.node_id.distance(&self.self_id).as_bytes())
            })
            .map(|e| e.info.clone())
    }

    /// Current close-group identifiers, increasing-distance order.
    pub fn close_group(&self) -> Vec<NodeId> {
        let inner = self.inner.lock().expect("routing table mutex poisoned");
        inner.close_group_ids(&self.self_id)
    }

    fn invoke_network_status(&self, size: usize) {
        let cb = self.callbacks.lock().expect("callbacks mutex poisoned");
        if let Some(f) = &cb.network_status {
            f(size);
        }
    }

    fn invoke_remove_node(&self, info: &NodeInfo, routing_only: bool) {
        let cb = self.callbacks.lock().expect("callbacks mutex poisoned");
        if let Some(f) = &cb.remove_node {
            f(info, routing_only);
        }
    }

    fn invoke_close_node_replaced(&self, group: &[NodeId]) {
        let cb = self.callbacks.lock().expect("callbacks mutex poisoned");
        if let Some(f) = &cb.close_node_replaced {
            f(group);
        }
    }

    fn invoke_remove_furthest(&self, furthest: &NodeId) {
        let cb = self.callbacks.lock().expect("callbacks mutex poisoned");
        if let Some(f) = &cb.remove_furthest {
            f(furthest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(self_id: &NodeId, id_byte: u8, conn_byte: u8) -> NodeInfo {
        NodeInfo::new(
            self_id,
            NodeId::padded(&[id_byte]),
            [id_byte; 32],
            NodeId::padded(&[conn_byte]),
            false,
        )
    }

    #[test]
    fn admission_below_capacity() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        assert!(table.add_node(peer(&self_id, 0x01, 0x11)));
        assert!(table.add_node(peer(&self_id, 0x02, 0x12)));
        assert!(table.add_node(peer(&self_id, 0x80, 0x13)));
        assert_eq!(table.size(), 3);

        let closest = table
            .closest_node(&NodeId::padded(&[0x03]), &HashSet::new(), false)
            .expect("table non-empty");
        assert_eq!(closest.node_id, NodeId::padded(&[0x02]));

        assert!(!table.is_closest_to(&NodeId::padded(&[0x40]), false));
    }

    #[test]
    fn rejects_self_and_duplicates() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        assert!(!table.add_node(peer(&self_id, 0x00, 0x01)));

        assert!(table.add_node(peer(&self_id, 0x01, 0x11)));
        assert!(!table.add_node(peer(&self_id, 0x01, 0x99)));
        assert!(!table.add_node(peer(&self_id, 0x77, 0x11)));
    }

    #[test]
    fn make_space_rejection_when_full_and_no_improvement() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        for b in 0u8..64 {
            let mut bytes = [0u8; 64];
            // one bit set per bucket index `b`, so common_leading_bits(self, p) == b
            bytes[(b / 8) as usize] = 0x80 >> (b % 8);
            let info = NodeInfo::new(
                &self_id,
                NodeId::from_bytes(bytes),
                [b; 32],
                NodeId::padded(&[b, 0xEE]),
                false,
            );
            assert!(table.add_node(info), "bucket {b} should admit");
        }
        assert_eq!(table.size(), K_MAX);

        // Same bucket occupancy as an existing entry at bucket 30: no diversity gain.
        let mut bytes = [0u8; 64];
        bytes[30 / 8] = 0x80 >> (30 % 8);
        bytes[31] ^= 0x01;
        let extra = NodeInfo::new(
            &self_id,
            NodeId::from_bytes(bytes),
            [0xAB; 32],
            NodeId::padded(&[0xFF, 0xEE]),
            false,
        );
        assert!(!table.add_node(extra));
        assert_eq!(table.size(), K_MAX);
    }

    #[test]
    fn close_group_replacement_fires_callback() {
        use std::sync::Arc;
        use std::sync::Mutex as StdMutex;

        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        let last_group = Arc::new(StdMutex::new(Vec::<NodeId>::new()));
        let lg = last_group.clone();
        table.set_callbacks(
            Box::new(|_| {}),
            Box::new(|_, _| {}),
            Box::new(move |group: &[NodeId]| {
                *lg.lock().expect("test mutex poisoned") = group.to_vec();
            }),
            Box::new(|_| {}),
        );

        for i in 1u8..=16 {
            assert!(table.add_node(peer(&self_id, i, i.wrapping_add(100))));
        }
        let group_before = last_group.lock().expect("test mutex poisoned").clone();
        assert_eq!(group_before.len(), G);
        assert_eq!(group_before, table.close_group());

        // Closer to self than anything already admitted (first byte 0x00,
        // second byte nonzero keeps it distinct and non-zero overall).
        let closer = NodeInfo::new(
            &self_id,
            NodeId::padded(&[0x00, 0x01]),
            [0xFE; 32],
            NodeId::padded(&[0xFE, 0xFE]),
            false,
        );
        assert!(table.add_node(closer));

        let group_after = last_group.lock().expect("test mutex poisoned").clone();
        assert_eq!(group_after.len(), G);
        assert_ne!(group_after, group_before);
        assert!(group_after.contains(&NodeId::padded(&[0x00, 0x01])));

        let differing: usize = group_after.iter().filter(|id| !group_before.contains(id)).count();
        assert_eq!(differing, 1);
    }

    #[test]
    fn nth_closest_sentinel_when_table_too_small() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        assert!(table.add_node(peer(&self_id, 0x01, 0x11)));
        assert_eq!(table.nth_closest(&self_id, 5), NodeId::MAX);
    }

    #[test]
    fn drop_node_removes_and_returns_entry() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        let id = NodeId::padded(&[0x01]);
        assert!(table.add_node(peer(&self_id, 0x01, 0x11)));
        let dropped = table.drop_node(&id, false).expect("present");
        assert_eq!(dropped.node_id, id);
        assert_eq!(table.size(), 0);
        assert!(table.drop_node(&id, false).is_none());
    }

    #[test]
    fn confirm_group_members_requires_both_in_group() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id, false);
        for i in 1u8..=4 {
            assert!(table.add_node(peer(&self_id, i, i + 50)));
        }
        let group = table.close_group();
        assert!(table.confirm_group_members(&group[0], &group[1]));
        assert!(!table.confirm_group_members(&group[0], &NodeId::padded(&[0xEE])));
    }
}
