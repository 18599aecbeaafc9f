use std::hash::Hash;
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

/// LRU (Least Recently Used) replacement policy over eviction candidates.
///
/// The linked hash map is both the recency queue and the position index:
/// front is the LRU end, back is the MRU end, and every operation is O(1)
/// amortized. All operations are serialized by one mutex.
pub struct LruReplacer<T: Hash + Eq + Clone> {
    queue: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq + Clone> LruReplacer<T> {
    pub fn new(capacity_hint: usize) -> Self {
        Self {
            queue: Mutex::new(LinkedHashMap::with_capacity(capacity_hint)),
        }
    }

    /// Record that `value` became an eviction candidate. A value already
    /// present is promoted to the MRU end without growing the set.
    pub fn insert(&self, value: T) {
        let mut queue = self.queue.lock();
        if queue.get_refresh(&value).is_none() {
            queue.insert(value, ());
        }
    }

    /// Remove and return the LRU-end value, or None when empty
    pub fn victim(&self) -> Option<T> {
        self.queue.lock().pop_front().map(|(value, ())| value)
    }

    /// Remove `value` if present; returns whether it was present
    pub fn erase(&self, value: &T) -> bool {
        self.queue.lock().remove(value).is_some()
    }

    /// Number of eviction candidates currently tracked
    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order() {
        let replacer = LruReplacer::new(4);
        for i in 1..=5 {
            replacer.insert(i);
        }
        assert_eq!(replacer.size(), 5);

        assert_eq!(replacer.victim(), Some(1));

        // Promoting 2 makes 3 the oldest survivor
        replacer.insert(2);
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), Some(4));
        assert_eq!(replacer.victim(), Some(5));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_duplicate_insert_promotes_without_growth() {
        let replacer = LruReplacer::new(4);
        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(1);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_erase() {
        let replacer = LruReplacer::new(4);
        replacer.insert(1);
        replacer.insert(2);
        assert!(replacer.erase(&1));
        assert!(!replacer.erase(&1));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
    }
}
