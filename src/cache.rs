//! Bounded, insertion-ordered, content-addressed cache.
//!
//! Holds recently-seen response payloads whose identifier is the hash of
//! their own content, so a repeated request for the same content can be
//! answered without forwarding further. Self-shrinks on integrity
//! violation rather than trusting a poisoned entry.

use std::collections::VecDeque;

use tracing::warn;

use crate::node_id::NodeId;
use crate::K_CACHE;

/// Hash `data` and fold the 256-bit BLAKE3 digest into a 512-bit
/// [`NodeId`] by zero-padding on the right, matching
/// [`NodeId::padded`]'s convention elsewhere in this crate.
pub fn content_id_of(data: &[u8]) -> NodeId {
    let digest = blake3::hash(data);
    NodeId::padded(digest.as_bytes())
}

struct CacheEntry {
    content_id: NodeId,
    data: Vec<u8>,
}

/// A bounded FIFO cache keyed by content hash.
pub struct ContentCache {
    entries: VecDeque<CacheEntry>,
    cache_size_hint: usize,
}

impl ContentCache {
    /// Construct an empty cache with the default [`K_CACHE`] capacity hint.
    pub fn new() -> Self {
        ContentCache {
            entries: VecDeque::new(),
            cache_size_hint: K_CACHE,
        }
    }

    /// Construct an empty cache with an explicit capacity hint.
    pub fn with_capacity_hint(cache_size_hint: usize) -> Self {
        ContentCache {
            entries: VecDeque::new(),
            cache_size_hint: cache_size_hint.max(1),
        }
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current soft capacity.
    pub fn capacity_hint(&self) -> usize {
        self.cache_size_hint
    }

    /// Insert `data` under `claimed_id`.
    ///
    /// Returns `true` on a verified insertion. On a hash mismatch, halves
    /// `cache_size_hint`, truncates the cache to the new hint, and drops
    /// the offending data without inserting it.
    pub fn put(&mut self, claimed_id: NodeId, data: Vec<u8>) -> bool {
        let actual_id = content_id_of(&data);
        if actual_id != claimed_id {
            warn!(claimed = %claimed_id, actual = %actual_id, "cache put failed hash verification, shrinking capacity");
            self.cache_size_hint = (self.cache_size_hint / 2).max(1);
            while self.entries.len() > self.cache_size_hint {
                self.entries.pop_front();
            }
            return false;
        }

        self.entries.push_back(CacheEntry {
            content_id: claimed_id,
            data,
        });
        while self.entries.len() > self.cache_size_hint {
            self.entries.pop_front();
        }
        true
    }

    /// Look up cached bytes for `content_id`.
    pub fn get(&self, content_id: &NodeId) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| &e.content_id == content_id)
            .map(|e| e.data.as_slice())
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = ContentCache::new();
        let data = b"hello world".to_vec();
        let id = content_id_of(&data);
        assert!(cache.put(id, data.clone()));
        assert_eq!(cache.get(&id), Some(data.as_slice()));
    }

    #[test]
    fn put_rejects_mismatched_hash_and_shrinks() {
        let mut cache = ContentCache::with_capacity_hint(10);
        let data = b"real content".to_vec();
        let wrong_id = content_id_of(b"not the real content");
        assert!(!cache.put(wrong_id, data));
        assert_eq!(cache.capacity_hint(), 5);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let mut cache = ContentCache::with_capacity_hint(2);
        let a = b"a".to_vec();
        let b = b"b".to_vec();
        let c = b"c".to_vec();
        let id_a = content_id_of(&a);
        let id_b = content_id_of(&b);
        let id_c = content_id_of(&c);
        assert!(cache.put(id_a, a));
        assert!(cache.put(id_b, b));
        assert!(cache.put(id_c, c));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&id_a).is_none());
        assert!(cache.get(&id_b).is_some());
        assert!(cache.get(&id_c).is_some());
    }

    #[test]
    fn capacity_floor_is_one() {
        let mut cache = ContentCache::with_capacity_hint(1);
        let wrong_id = content_id_of(b"mismatch");
        assert!(!cache.put(wrong_id, b"data".to_vec()));
        assert_eq!(cache.capacity_hint(), 1);
    }
}
