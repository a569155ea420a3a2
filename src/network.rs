//! The contract this crate consumes from the underlying reliable-UDP
//! transport, and the validation-and-add protocol that runs on top of it.
//!
//! No production transport is bundled here: the transport is an external
//! collaborator. Only a deterministic in-memory test double is shipped,
//! for this crate's own test suite.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client_table::ClientRoutingTable;
use crate::node_id::NodeId;
use crate::node_info::{ConnectionId, NodeInfo, PublicKey};
use crate::routing_table::RoutingTable;
use crate::{DhtError, Result, G};

/// An IP address and 16-bit port, as stored in bootstrap contact records
/// and passed to [`NetworkAdapter::add`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

/// The capability set this crate requires of the transport: establish,
/// validate, tear down, and send on a connection.
///
/// Implemented with return-position `impl Future` rather than the
/// `async-trait` crate, matching this codebase's existing transport-facing
/// traits; as a consequence this trait is generic-only, not object-safe.
pub trait NetworkAdapter: Send + Sync {
    /// Establish a reliable channel to `connection_id`, sending
    /// `handshake_bytes` once it is up.
    fn add(
        &self,
        connection_id: ConnectionId,
        endpoint: Endpoint,
        handshake_bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Promote a pending connection to validated.
    fn mark_valid(&self, connection_id: ConnectionId) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Tear down a connection.
    fn remove(&self, connection_id: ConnectionId) -> impl std::future::Future<Output = ()> + Send;

    /// Enqueue an outbound frame.
    fn send(&self, connection_id: ConnectionId, bytes: Vec<u8>) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Runs the validation-and-add protocol for a peer whose handshake just
/// completed: mark the connection valid, build its [`NodeInfo`], and admit
/// it to the appropriate table, removing the connection on rejection.
pub async fn validate_and_add<N: NetworkAdapter>(
    network: &N,
    routing_table: &RoutingTable,
    client_table: &ClientRoutingTable,
    node_id: NodeId,
    public_key: PublicKey,
    connection_id: ConnectionId,
    is_client: bool,
) -> bool {
    if let Err(err) = network.mark_valid(connection_id).await {
        warn!(peer = %node_id, error = %err, "mark_valid failed, rejecting peer");
        return false;
    }

    let peer = NodeInfo::new(
        &routing_table.self_id(),
        node_id,
        public_key,
        connection_id,
        is_client,
    );

    let admitted = if is_client {
        let horizon = routing_table.nth_closest(&routing_table.self_id(), 2 * G);
        client_table.add_node(peer, horizon)
    } else {
        routing_table.add_node(peer)
    };

    if !admitted {
        debug!(peer = %node_id, "admission rejected, tearing down connection");
        network.remove(connection_id).await;
    }
    admitted
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Add(ConnectionId, Endpoint),
    MarkValid(ConnectionId),
    Remove(ConnectionId),
    Send(ConnectionId, Vec<u8>),
}

/// A deterministic in-memory [`NetworkAdapter`] for tests.
///
/// Records every call it receives and fails `add`/`mark_valid`/`send` for
/// any connection identifier pre-registered via [`Self::fail_on`].
pub struct InMemoryNetworkAdapter {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<Vec<ConnectionId>>,
}

impl InMemoryNetworkAdapter {
    pub fn new() -> Self {
        InMemoryNetworkAdapter {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Make every future call touching `connection_id` fail.
    pub fn fail_on(&self, connection_id: ConnectionId) {
        self.failing.lock().expect("test double mutex poisoned").push(connection_id);
    }

    fn should_fail(&self, connection_id: &ConnectionId) -> bool {
        self.failing
            .lock()
            .expect("test double mutex poisoned")
            .contains(connection_id)
    }

    pub fn removed_connections(&self) -> Vec<ConnectionId> {
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .iter()
            .filter_map(|c| match c {
                Call::Remove(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn sent_frames(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .iter()
            .filter_map(|c| match c {
                Call::Send(id, bytes) => Some((*id, bytes.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Default for InMemoryNetworkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkAdapter for InMemoryNetworkAdapter {
    async fn add(&self, connection_id: ConnectionId, endpoint: Endpoint, _handshake_bytes: Vec<u8>) -> Result<()> {
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .push(Call::Add(connection_id, endpoint));
        if self.should_fail(&connection_id) {
            return Err(DhtError::Transport {
                connection_id,
                reason: "simulated add failure".into(),
            });
        }
        Ok(())
    }

    async fn mark_valid(&self, connection_id: ConnectionId) -> Result<()> {
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .push(Call::MarkValid(connection_id));
        if self.should_fail(&connection_id) {
            return Err(DhtError::Transport {
                connection_id,
                reason: "simulated mark_valid failure".into(),
            });
        }
        Ok(())
    }

    async fn remove(&self, connection_id: ConnectionId) {
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .push(Call::Remove(connection_id));
    }

    async fn send(&self, connection_id: ConnectionId, bytes: Vec<u8>) -> Result<()> {
        if self.should_fail(&connection_id) {
            return Err(DhtError::Transport {
                connection_id,
                reason: "simulated send failure".into(),
            });
        }
        self.calls
            .lock()
            .expect("test double mutex poisoned")
            .push(Call::Send(connection_id, bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validate_and_add_admits_vault_peer() {
        let self_id = NodeId::ZERO;
        let routing_table = RoutingTable::new(self_id, false);
        let client_table = ClientRoutingTable::new(self_id);
        let network = InMemoryNetworkAdapter::new();

        let admitted = validate_and_add(
            &network,
            &routing_table,
            &client_table,
            NodeId::padded(&[0x01]),
            [1u8; 32],
            NodeId::padded(&[0x11]),
            false,
        )
        .await;

        assert!(admitted);
        assert_eq!(routing_table.size(), 1);
        assert!(network.removed_connections().is_empty());
    }

    #[tokio::test]
    async fn validate_and_add_removes_connection_on_mark_valid_failure() {
        let self_id = NodeId::ZERO;
        let routing_table = RoutingTable::new(self_id, false);
        let client_table = ClientRoutingTable::new(self_id);
        let network = InMemoryNetworkAdapter::new();
        let connection_id = NodeId::padded(&[0x11]);
        network.fail_on(connection_id);

        let admitted = validate_and_add(
            &network,
            &routing_table,
            &client_table,
            NodeId::padded(&[0x01]),
            [1u8; 32],
            connection_id,
            false,
        )
        .await;

        assert!(!admitted);
        assert_eq!(routing_table.size(), 0);
    }

    #[tokio::test]
    async fn validate_and_add_removes_connection_on_admission_rejection() {
        let self_id = NodeId::ZERO;
        let routing_table = RoutingTable::new(self_id, false);
        let client_table = ClientRoutingTable::new(self_id);
        let network = InMemoryNetworkAdapter::new();

        // Self id as peer node_id is always rejected by the routing table.
        let admitted = validate_and_add(
            &network,
            &routing_table,
            &client_table,
            self_id,
            [1u8; 32],
            NodeId::padded(&[0x11]),
            false,
        )
        .await;

        assert!(!admitted);
        assert_eq!(network.removed_connections(), vec![NodeId::padded(&[0x11])]);
    }

    #[tokio::test]
    async fn validate_and_add_admits_client_within_horizon() {
        let self_id = NodeId::ZERO;
        let routing_table = RoutingTable::new(self_id, false);
        let client_table = ClientRoutingTable::new(self_id);
        let network = InMemoryNetworkAdapter::new();

        let admitted = validate_and_add(
            &network,
            &routing_table,
            &client_table,
            NodeId::padded(&[0x01]),
            [1u8; 32],
            NodeId::padded(&[0x11]),
            true,
        )
        .await;

        assert!(admitted);
        assert_eq!(client_table.size(), 1);
    }
}
