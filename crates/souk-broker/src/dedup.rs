// Duplicate suppression for the peer overlay: every envelope carries a
// message id, and each broker remembers the most recent ones.
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded cache of recently seen message ids.
pub struct DedupCache {
    seen: LruCache<String, ()>,
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("len", &self.seen.len())
            .field("cap", &self.seen.cap())
            .finish()
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Records a message id. Returns `true` when it was not seen before
    /// (the message should be processed), `false` on a replay.
    pub fn observe(&mut self, message_id: &str) -> bool {
        if self.seen.contains(message_id) {
            // Refresh recency so a chatty duplicate stays suppressed.
            self.seen.promote(message_id);
            return false;
        }
        self.seen.put(message_id.to_string(), ());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
