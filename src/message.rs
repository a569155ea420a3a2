//! The wire message schema and its validation rules.

use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;
use crate::{DhtError, Result, MAX_ROUTE_HISTORY};

/// Overlay message type. A closed tagged variant; dispatch is a single match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Ping,
    Connect,
    FindNodes,
    ConnectSuccess,
    ConnectSuccessAck,
    Remove,
    ClosestNodesUpdate,
    GetGroup,
    NodeLevel,
}

/// Whether a message participates in the content cache, and how.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cacheable {
    /// Not cache-relevant.
    None,
    /// A request seeking a cached value.
    Get,
    /// A response offering a value for caching.
    Put,
}

/// A structured overlay message.
///
/// Encoded on the wire via [`crate::codec`]. `source_id` is required unless
/// both `relay_id` and `relay_connection_id` are present (the sender is
/// behind NAT and reachable only via a relay's connection).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub source_id: Option<NodeId>,
    pub destination_id: NodeId,
    pub message_type: MessageType,
    pub request: bool,
    pub response: bool,
    /// `true` if this message must be delivered only to the exact
    /// `destination_id`, never to a near neighbor.
    pub direct: bool,
    pub cacheable: Cacheable,
    /// `true` for overlay control traffic, `false` for opaque application payload.
    pub routing_message: bool,
    pub data: Vec<u8>,
    /// 32-bit request correlator.
    pub id: u32,
    /// Decremented on every forward; the message is dropped at `<= 0`.
    pub hops_to_live: i32,
    /// Previous hops, bounded to [`MAX_ROUTE_HISTORY`] entries.
    pub route_history: Vec<NodeId>,
    pub relay_id: Option<NodeId>,
    pub relay_connection_id: Option<NodeId>,
}

impl Message {
    /// Draw a fresh 32-bit request correlator.
    ///
    /// Plain randomness, not a counter: two nodes issuing requests
    /// concurrently must not collide without coordinating.
    pub fn next_request_id() -> u32 {
        rand::random()
    }

    /// Validate the frame per the wire schema's invariants. Does not mutate.
    pub fn validate(&self) -> Result<()> {
        if self.hops_to_live <= 0 {
            return Err(DhtError::HopsExhausted { id: self.id });
        }
        if self.destination_id.is_zero() {
            return Err(DhtError::MalformedMessage("zero destination_id".into()));
        }

        let has_source = self.source_id.is_some();
        let has_relay = self.relay_id.is_some() && self.relay_connection_id.is_some();
        if !has_source && !has_relay {
            return Err(DhtError::MalformedMessage(
                "neither source_id nor full relay pair present".into(),
            ));
        }
        if let Some(sid) = self.source_id {
            if sid.is_zero() {
                return Err(DhtError::MalformedMessage("zero source_id".into()));
            }
        }
        if let Some(rid) = self.relay_id {
            if rid.is_zero() {
                return Err(DhtError::MalformedMessage("zero relay_id".into()));
            }
        }
        if let Some(rcid) = self.relay_connection_id {
            if rcid.is_zero() {
                return Err(DhtError::MalformedMessage("zero relay_connection_id".into()));
            }
        }

        if self.message_type == MessageType::Connect && !self.direct {
            return Err(DhtError::MalformedMessage("Connect must be direct".into()));
        }
        if self.message_type == MessageType::FindNodes && !self.request && !self.direct {
            return Err(DhtError::MalformedMessage(
                "FindNodes response must be direct".into(),
            ));
        }

        if self.route_history.len() > MAX_ROUTE_HISTORY {
            return Err(DhtError::RouteHistoryFull {
                id: self.id,
                max: MAX_ROUTE_HISTORY,
            });
        }

        Ok(())
    }

    /// Append `hop` to `route_history` and decrement `hops_to_live`.
    ///
    /// Fails if `route_history` is already at capacity; the caller should
    /// drop the message on error rather than forward it further.
    pub fn record_hop(&mut self, hop: NodeId) -> Result<()> {
        if self.route_history.len() >= MAX_ROUTE_HISTORY {
            return Err(DhtError::RouteHistoryFull {
                id: self.id,
                max: MAX_ROUTE_HISTORY,
            });
        }
        self.route_history.push(hop);
        self.hops_to_live -= 1;
        Ok(())
    }
}
