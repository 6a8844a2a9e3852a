//! Bounded TTL cache for validation state.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe map with a per-entry TTL and a hard capacity.
///
/// When full, expired slots are reclaimed first; if none are, the slot
/// closest to expiry is evicted so an insert always succeeds.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Insert or replace an entry, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let mut slots = self.slots.lock().unwrap();
        let now = Instant::now();

        if slots.len() >= self.capacity && !slots.contains_key(&key) {
            slots.retain(|_, slot| slot.expires_at > now);
            if slots.len() >= self.capacity {
                if let Some(oldest) = slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    slots.remove(&oldest);
                }
            }
        }

        slots.insert(
            key,
            Slot {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Get a live entry.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(key)
            .filter(|slot| slot.expires_at > Instant::now())
            .map(|slot| slot.value.clone())
    }

    /// Whether a live entry exists.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry, returning it if it was live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .remove(key)
            .filter(|slot| slot.expires_at > Instant::now())
            .map(|slot| slot.value)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| slot.expires_at > now);
        before - slots.len()
    }

    /// Live plus not-yet-purged entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let cache: TtlCache<String, u64> = TtlCache::new(10, Duration::from_secs(60));

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert!(cache.contains(&"a".to_string()));

        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert!(!cache.contains(&"a".to_string()));
        assert_eq!(cache.remove(&"a".to_string()), None);
    }

    #[test]
    fn entries_expire() {
        let cache: TtlCache<String, ()> = TtlCache::new(10, Duration::from_millis(1));
        cache.insert("t".to_string(), ());
        std::thread::sleep(Duration::from_millis(5));

        assert!(!cache.contains(&"t".to_string()));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_nearest_expiry() {
        let cache: TtlCache<u32, u32> = TtlCache::new(3, Duration::from_secs(60));
        cache.insert(1, 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, 2);
        cache.insert(3, 3);

        // Full; inserting a fourth key evicts the oldest slot (key 1).
        cache.insert(4, 4);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&4));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert(2, 20);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), Some(20));
        assert!(cache.contains(&1));
    }
}
