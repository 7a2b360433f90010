// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use trellis_context::ContentHash;

use crate::ids::PlugId;

/// Output plug and the hash of the context it was hashed in.
pub(crate) type HashKey = (PlugId, ContentHash);

/// Remembers output hashes between requests. Cleared by every dirty wave.
pub(crate) struct HashCache {
    entries: Mutex<LruCache<HashKey, ContentHash>>,
}

fn capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)
}

impl HashCache {
    pub(crate) fn new(entries: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity(entries))),
        }
    }

    pub(crate) fn get(&self, key: &HashKey) -> Option<ContentHash> {
        self.entries.lock().get(key).copied()
    }

    pub(crate) fn insert(&self, key: HashKey, hash: ContentHash) {
        self.entries.lock().put(key, hash);
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn set_capacity(&self, entries: usize) {
        self.entries.lock().resize(capacity(entries));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use trellis_context::ContentHasher;

    use super::*;
    use crate::ids::ComponentId;

    fn key(slot: u32) -> HashKey {
        (PlugId(ComponentId::new(slot, 1)), ContentHash::ZERO)
    }

    #[test]
    fn capacity_is_clamped_and_evicts_least_recent() {
        let cache = HashCache::new(0);
        let h = ContentHasher::new().append("x").finish();
        cache.insert(key(1), h);
        cache.insert(key(2), h);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)), None);
        assert_eq!(cache.get(&key(2)), Some(h));

        cache.set_capacity(2);
        cache.insert(key(3), h);
        cache.get(&key(2));
        cache.insert(key(4), h);
        assert_eq!(cache.get(&key(3)), None);
        assert_eq!(cache.get(&key(2)), Some(h));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
