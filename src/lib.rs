//! # horizon-dht
//!
//! Routing core for a Kademlia-derived distributed hash table overlay.
//!
//! This crate implements:
//! - 512-bit [`NodeId`](node_id::NodeId) identifiers and the XOR distance metric
//! - [`RoutingTable`](routing_table::RoutingTable): bounded peer admission, eviction,
//!   proximity queries, and close-group change notification
//! - [`ClientRoutingTable`](client_table::ClientRoutingTable): the asymmetric
//!   admission variant used for non-routing peers
//! - [`ContentCache`](cache::ContentCache): a bounded, self-shrinking content cache
//! - [`MessageProcessor`](processor::MessageProcessor): validation, forwarding,
//!   find-node RPC handling, and cache short-circuiting
//! - [`NetworkAdapter`](network::NetworkAdapter): the contract consumed from the
//!   underlying reliable-UDP transport
//! - a CBOR wire [`codec`] for the message schema
//! - [`DhtConfig`](config::DhtConfig): the on-disk identity/bootstrap record
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | `K_MAX` (routing table capacity) | 64 |
//! | `G` (close-group / closest-nodes size) | 8 |
//! | `K_CACHE` (content cache capacity) | 100 |
//! | `MAX_ROUTE_HISTORY` | 5 |
//! | Node identifier width | 512 bits (64 bytes) |

pub mod cache;
pub mod client_table;
pub mod codec;
pub mod config;
pub mod message;
pub mod network;
pub mod node_id;
pub mod node_info;
pub mod processor;
pub mod routing_table;

pub use node_id::NodeId;
pub use node_info::NodeInfo;

/// Maximum number of peers a [`routing_table::RoutingTable`] will hold.
pub const K_MAX: usize = 64;

/// Close-group / closest-nodes size: the number of peers considered "close"
/// to a given target for group-membership and forwarding-fanout purposes.
pub const G: usize = 8;

/// Default soft capacity of the content cache.
pub const K_CACHE: usize = 100;

/// Maximum length of a message's `route_history`.
pub const MAX_ROUTE_HISTORY: usize = 5;

/// Upper bound on total hops a message may traverse before being dropped,
/// even if `hops_to_live` were misconfigured above this value.
pub const MAX_HOPS: u32 = 64;

/// Default configuration filename.
pub const DEFAULT_CONFIG_FILENAME: &str = "dht_config";

/// Error types for DHT routing-core operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// A wire frame failed schema or semantic validation.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The configuration file was absent or failed to decode.
    #[error("malformed or missing configuration: {0}")]
    MalformedConfig(String),

    /// A cache entry's content hash did not match its key.
    #[error("content cache integrity violation for content id {0}")]
    CacheIntegrityViolation(NodeId),

    /// The network adapter reported a transport-level failure.
    #[error("transport error on connection {connection_id}: {reason}")]
    Transport {
        connection_id: NodeId,
        reason: String,
    },

    /// A message's `hops_to_live` reached zero before delivery.
    #[error("message {id} exhausted hops_to_live")]
    HopsExhausted { id: u32 },

    /// A message's `route_history` was already at capacity.
    #[error("message {id} route_history at capacity ({max})")]
    RouteHistoryFull { id: u32, max: usize },

    /// Wire encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Convenience result type for DHT routing-core operations.
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K_MAX, 64);
        assert_eq!(G, 8);
        assert_eq!(K_CACHE, 100);
        assert_eq!(MAX_ROUTE_HISTORY, 5);
    }

    #[test]
    fn test_error_display() {
        let err = DhtError::HopsExhausted { id: 7 };
        assert!(err.to_string().contains('7'));
    }
}
