//! Validates, forwards, and dispatches overlay messages; drives the
//! content cache and find-node RPC handling.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::cache::ContentCache;
use crate::codec;
use crate::message::{Cacheable, Message, MessageType};
use crate::network::NetworkAdapter;
use crate::node_id::NodeId;
use crate::node_info::ConnectionId;
use crate::routing_table::RoutingTable;
use crate::G;

/// Where proximity classification places a probe identifier relative to a
/// target and its known holders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityClass {
    InRange,
    InProximal,
    Outwith,
}

/// Classify `probe`'s proximity to `target`, given the up-to-`G` holder
/// identifiers already known to be close to `target` and a configured
/// `radius`.
pub fn group_range(
    target: &NodeId,
    probe: &NodeId,
    holders: &[NodeId],
    radius: &NodeId,
) -> ProximityClass {
    if target == probe {
        return ProximityClass::Outwith;
    }
    if holders.contains(probe) {
        return ProximityClass::InRange;
    }
    let distance = probe.distance(target);
    if distance.as_bytes() < radius.as_bytes() {
        ProximityClass::InProximal
    } else {
        ProximityClass::Outwith
    }
}

/// Result of processing a single inbound message.
#[derive(Debug)]
pub enum Outcome {
    /// Failed validation or an internal policy check; never forwarded.
    Dropped(String),
    /// Re-emitted one hop closer via the network adapter.
    Forwarded,
    /// Answered directly from the content cache; not forwarded further.
    CacheHit,
    /// A direct message reached a node other than its exact destination;
    /// a delivery-failure signal was sent back to the source.
    DeliveryFailure,
    /// A `FindNodes` request was answered with this node's closest peers.
    FindNodesAnswered,
    /// A `FindNodes` response named these candidate identifiers; resolving
    /// them into full contact info (endpoint, public key) and establishing
    /// a connection is the host's responsibility, via
    /// [`crate::network::NetworkAdapter::add`] followed by
    /// [`crate::network::validate_and_add`].
    DiscoveredCandidates(Vec<NodeId>),
    /// A `NodeLevel` message, surfaced to the host application unchanged.
    Delivered(Message),
    /// A `Connect` message, handed to the host's connection management.
    ConnectHandled(Message),
    /// An unrecognized message type.
    UnknownType,
}

/// Drives validation, forwarding, and dispatch for one node's inbound traffic.
pub struct MessageProcessor<N: NetworkAdapter> {
    routing_table: Arc<RoutingTable>,
    network: Arc<N>,
    cache: Mutex<ContentCache>,
    /// Runtime-configurable proximity boundary used by [`group_range`].
    proximity_radius: NodeId,
}

impl<N: NetworkAdapter> MessageProcessor<N> {
    pub fn new(routing_table: Arc<RoutingTable>, network: Arc<N>, proximity_radius: NodeId) -> Self {
        MessageProcessor {
            routing_table,
            network,
            cache: Mutex::new(ContentCache::new()),
            proximity_radius,
        }
    }

    /// Classify `probe`'s proximity to `target` using this processor's
    /// configured proximity radius and the given close-group holders.
    pub fn classify_proximity(&self, target: &NodeId, probe: &NodeId, holders: &[NodeId]) -> ProximityClass {
        group_range(target, probe, holders, &self.proximity_radius)
    }

    /// Process one inbound message, received over `from_connection`.
    pub async fn process(&self, from_connection: ConnectionId, mut message: Message) -> Outcome {
        if let Err(err) = message.validate() {
            warn!(error = %err, id = message.id, "dropping invalid message");
            return Outcome::Dropped(err.to_string());
        }

        if message.cacheable != Cacheable::None {
            if let Some(outcome) = self.handle_cache(&mut message).await {
                return outcome;
            }
        }

        let self_id = self.routing_table.self_id();
        let is_self_closest = self.routing_table.is_closest_to(&message.destination_id, false);

        if !is_self_closest {
            return self.forward(message).await;
        }

        if message.direct && message.destination_id != self_id {
            return self.respond_delivery_failure(from_connection, &message).await;
        }

        self.dispatch_local(from_connection, message).await
    }

    /// Apply the put/get cache logic. Returns `Some(outcome)` only when
    /// processing must terminate here (an integrity-violating put, or a
    /// cache hit); a successfully-cached put returns `None` so the message
    /// falls through to the usual forward/dispatch steps, since caching a
    /// response does not change where it is headed.
    async fn handle_cache(&self, message: &mut Message) -> Option<Outcome> {
        match message.cacheable {
            Cacheable::Put if message.response => {
                let Some(source_id) = message.source_id else {
                    return Some(Outcome::Dropped("Put message missing source_id".into()));
                };
                let inserted = {
                    let mut cache = self.cache.lock().expect("cache mutex poisoned");
                    cache.put(source_id, message.data.clone())
                };
                if !inserted {
                    let err = crate::DhtError::CacheIntegrityViolation(source_id);
                    warn!(id = message.id, error = %err, "dropping message");
                    return Some(Outcome::Dropped(err.to_string()));
                }
                None
            }
            Cacheable::Get if message.request => {
                let Some(key) = message.source_id else {
                    return None;
                };
                let cached = {
                    let cache = self.cache.lock().expect("cache mutex poisoned");
                    cache.get(&key).map(|b| b.to_vec())
                };
                let Some(data) = cached else {
                    return None;
                };
                let self_id = self.routing_table.self_id();
                let response = Message {
                    source_id: Some(self_id),
                    destination_id: key,
                    message_type: message.message_type,
                    request: false,
                    response: true,
                    direct: true,
                    cacheable: Cacheable::Get,
                    routing_message: message.routing_message,
                    data,
                    id: message.id,
                    hops_to_live: message.hops_to_live,
                    route_history: Vec::new(),
                    relay_id: None,
                    relay_connection_id: None,
                };
                debug!(content_id = %key, "cache hit, routing response toward requester");
                let exclude = HashSet::new();
                let Some(next) = self.routing_table.closest_node(&response.destination_id, &exclude, false) else {
                    warn!(id = message.id, "cache hit but no next hop known, dropping");
                    return Some(Outcome::Dropped("no next hop for cache response".into()));
                };
                let _ = self.reply(next.connection_id, &response).await;
                Some(Outcome::CacheHit)
            }
            _ => None,
        }
    }

    async fn forward(&self, mut message: Message) -> Outcome {
        let self_id = self.routing_table.self_id();
        let visited: HashSet<NodeId> = message.route_history.iter().copied().collect();
        let Some(next) = self.routing_table.closest_node(&message.destination_id, &visited, false) else {
            warn!(id = message.id, "no next hop known, dropping");
            return Outcome::Dropped("no next hop".into());
        };
        if let Err(err) = message.record_hop(self_id) {
            warn!(id = message.id, error = %err, "dropping message");
            return Outcome::Dropped(err.to_string());
        }
        if message.hops_to_live <= 0 {
            warn!(id = message.id, "hops_to_live exhausted at forwarding node, dropping");
            return Outcome::Dropped(
                crate::DhtError::HopsExhausted { id: message.id }.to_string(),
            );
        }
        match codec::encode_message(&message) {
            Ok(bytes) => {
                if let Err(err) = self.network.send(next.connection_id, bytes).await {
                    warn!(error = %err, "forward send failed");
                    return Outcome::Dropped(err.to_string());
                }
                Outcome::Forwarded
            }
            Err(err) => Outcome::Dropped(err.to_string()),
        }
    }

    async fn reply(&self, connection_id: ConnectionId, message: &Message) -> Outcome {
        match codec::encode_message(message) {
            Ok(bytes) => match self.network.send(connection_id, bytes).await {
                Ok(()) => Outcome::Forwarded,
                Err(err) => Outcome::Dropped(err.to_string()),
            },
            Err(err) => Outcome::Dropped(err.to_string()),
        }
    }

    async fn respond_delivery_failure(&self, from_connection: ConnectionId, message: &Message) -> Outcome {
        let Some(source_id) = message.source_id else {
            return Outcome::Dropped("direct message undeliverable and sourceless".into());
        };
        let self_id = self.routing_table.self_id();
        warn!(destination = %message.destination_id, "direct message not deliverable here");
        let failure = Message {
            source_id: Some(self_id),
            destination_id: source_id,
            message_type: message.message_type,
            request: false,
            response: true,
            direct: true,
            cacheable: Cacheable::None,
            routing_message: true,
            data: Vec::new(),
            id: message.id,
            hops_to_live: message.hops_to_live,
            route_history: Vec::new(),
            relay_id: None,
            relay_connection_id: None,
        };
        let _ = self.reply(from_connection, &failure).await;
        Outcome::DeliveryFailure
    }

    async fn dispatch_local(&self, from_connection: ConnectionId, message: Message) -> Outcome {
        match message.message_type {
            MessageType::FindNodes if message.request => self.do_find_node_request(from_connection, message).await,
            MessageType::FindNodes => self.do_find_node_response(message),
            MessageType::Connect => Outcome::ConnectHandled(message),
            MessageType::NodeLevel => Outcome::Delivered(message),
            _ => Outcome::UnknownType,
        }
    }

    async fn do_find_node_request(&self, from_connection: ConnectionId, message: Message) -> Outcome {
        let closest = self.routing_table.closest_nodes(&message.destination_id, G);
        let Ok(payload) = codec::to_vec(&closest) else {
            return Outcome::Dropped("failed to encode find-node response".into());
        };
        let Some(source_id) = message.source_id else {
            return Outcome::Dropped("FindNodes request missing source_id".into());
        };
        let self_id = self.routing_table.self_id();
        let response = Message {
            source_id: Some(self_id),
            destination_id: source_id,
            message_type: MessageType::FindNodes,
            request: false,
            response: true,
            direct: true,
            cacheable: Cacheable::None,
            routing_message: true,
            data: payload,
            id: message.id,
            hops_to_live: message.hops_to_live,
            route_history: Vec::new(),
            relay_id: None,
            relay_connection_id: None,
        };
        self.reply(from_connection, &response).await;
        Outcome::FindNodesAnswered
    }

    fn do_find_node_response(&self, message: Message) -> Outcome {
        let candidates: Vec<NodeId> = match codec::from_slice(&message.data) {
            Ok(ids) => ids,
            Err(err) => return Outcome::Dropped(err.to_string()),
        };
        let self_id = self.routing_table.self_id();
        let unknown: Vec<NodeId> = candidates
            .into_iter()
            .filter(|id| *id != self_id)
            .collect();
        Outcome::DiscoveredCandidates(unknown)
    }
}
