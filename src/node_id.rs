//! 512-bit node identifiers and the XOR distance metric.
//!
//! Every peer and every routable message carries a [`NodeId`]: a fixed-width,
//! opaque identifier. Proximity between two identifiers is their XOR distance,
//! interpreted as an unsigned big-endian integer. Smaller is closer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Width of a [`NodeId`] in bytes (512 bits).
pub const NODE_ID_BYTES: usize = 64;

/// A fixed-width 512-bit opaque identifier.
///
/// `NodeId` never carries structure beyond its bytes: it is not parsed,
/// only compared, XORed, and hex-printed for logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "serde_bytes_64")] pub [u8; NODE_ID_BYTES]);

impl NodeId {
    /// All-zero identifier. Used as a sentinel for "no id" and the self-exclusion check.
    pub const ZERO: NodeId = NodeId([0u8; NODE_ID_BYTES]);

    /// All-ones identifier. Returned by [`crate::routing_table::RoutingTable::nth_closest`]
    /// when the table has fewer than `n` entries: it compares as further than any real id.
    pub const MAX: NodeId = NodeId([0xFFu8; NODE_ID_BYTES]);

    /// Build a `NodeId` from raw bytes.
    pub fn from_bytes(bytes: [u8; NODE_ID_BYTES]) -> Self {
        NodeId(bytes)
    }

    /// Build a `NodeId` by zero-padding a short byte slice on the right.
    ///
    /// Convenience for tests and examples that write `NodeId::padded(&[0x01])`.
    pub fn padded(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; NODE_ID_BYTES];
        let n = prefix.len().min(NODE_ID_BYTES);
        bytes[..n].copy_from_slice(&prefix[..n]);
        NodeId(bytes)
    }

    /// Borrow the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_BYTES] {
        &self.0
    }

    /// Return whether every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; NODE_ID_BYTES]
    }

    /// XOR distance between `self` and `other`, as a 512-bit big-endian magnitude.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut out = [0u8; NODE_ID_BYTES];
        for i in 0..NODE_ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        NodeId(out)
    }

    /// `true` iff `a` is strictly closer to `target` than `b` is.
    ///
    /// `closer_to_target(a, b, t) := (a ⊕ t) < (b ⊕ t)`, comparing the XOR
    /// distances as unsigned big-endian integers (equivalently, lexicographic
    /// byte comparison, since both are fixed-width and big-endian).
    pub fn closer_to_target(a: &NodeId, b: &NodeId, target: &NodeId) -> bool {
        a.distance(target).0 < b.distance(target).0
    }

    /// Count of identical high-order bits between `self` and `other`.
    ///
    /// This is the bucket index used by the routing table: two identifiers
    /// that agree on more leading bits are "further" in Kademlia's bucket
    /// sense (closer numerically, same convention as `leading_zeros` of the
    /// XOR distance). Returns `NODE_ID_BYTES * 8` (i.e. all bits) iff the two
    /// identifiers are identical.
    pub fn common_leading_bits(a: &NodeId, b: &NodeId) -> usize {
        let distance = a.distance(b);
        for (i, byte) in distance.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        NODE_ID_BYTES * 8
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &hex::encode(self.0)[..16])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::ZERO
    }
}

/// Serde support for `[u8; 64]` as a CBOR byte string, which `serde_derive`
/// cannot handle natively for arrays this large without const-generic serde
/// support.
mod serde_bytes_64 {
    use std::fmt;

    use serde::de::{Error as DeError, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    struct NodeIdBytesVisitor;

    impl<'de> Visitor<'de> for NodeIdBytesVisitor {
        type Value = [u8; 64];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "64 bytes")
        }

        fn visit_bytes<E: DeError>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into()
                .map_err(|_| E::invalid_length(v.len(), &"64 bytes"))
        }

        fn visit_byte_buf<E: DeError>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            self.visit_bytes(&v)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut out = [0u8; 64];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(i, &"64 bytes"))?;
            }
            Ok(out)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(NodeIdBytesVisitor)
    }
}
