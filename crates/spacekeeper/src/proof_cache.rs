use crate::proof::WorkSpaceProof;
use lru::LruCache;
use parking_lot::Mutex;
use poc_primitives::Challenge;
use std::fmt;
use std::sync::Arc;

/// Bounded memoization of proof lookups.
///
/// Keyed by work space id concatenated with the hex challenge. Entries are
/// inserted last-writer-wins and evicted least-recently-used; failed lookups
/// are cached exactly like successful ones, callers tell them apart by the
/// embedded error.
pub struct ProofCache {
    entries: Mutex<LruCache<String, Arc<WorkSpaceProof>>>,
}

impl fmt::Debug for ProofCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofCache")
            .field("len", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl ProofCache {
    /// Creates a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cache key for one `(work space, challenge)` pair.
    pub fn key(sid: &str, challenge: &Challenge) -> String {
        format!("{sid}{challenge}")
    }

    /// Cached record for `key`, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<Arc<WorkSpaceProof>> {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts a record, replacing any previous one under the same key.
    pub fn insert(&self, key: String, proof: Arc<WorkSpaceProof>) {
        self.entries.lock().put(key, proof);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poc_primitives::{BitLength, Proof, PublicKey};

    fn record(sid: &str, x: u64) -> Arc<WorkSpaceProof> {
        Arc::new(WorkSpaceProof {
            space_id: sid.to_string(),
            public_key: PublicKey::default(),
            ordinal: 0,
            proof: Ok(Proof {
                x,
                x_prime: x + 1,
                bit_length: BitLength::new(24).unwrap(),
            }),
        })
    }

    #[test]
    fn memoizes_by_key() {
        let cache = ProofCache::new(16);
        let challenge = Challenge::from([5u8; 32]);
        let key = ProofCache::key("sid", &challenge);

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), record("sid", 1));
        assert_eq!(cache.get(&key).unwrap().space_id, "sid");
    }

    #[test]
    fn respects_capacity_bound() {
        let cache = ProofCache::new(3);
        for i in 0..10u64 {
            cache.insert(format!("sid-{i}"), record(&format!("sid-{i}"), i));
        }
        assert_eq!(cache.len(), 3);
        // the oldest entries were evicted
        assert!(cache.get("sid-0").is_none());
        assert!(cache.get("sid-9").is_some());
    }

    #[test]
    fn insert_is_last_writer_wins() {
        let cache = ProofCache::new(4);
        cache.insert("key".to_string(), record("first", 1));
        cache.insert("key".to_string(), record("second", 2));
        assert_eq!(cache.get("key").unwrap().space_id, "second");
        assert_eq!(cache.len(), 1);
    }
}
