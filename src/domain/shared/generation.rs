//! Generation counters for superseding in-flight work
//!
//! Each logical action (one per peer, one per external-service action) is
//! stamped with a generation when it starts. Starting a new action under the
//! same key makes every older generation stale, so results arriving late
//! can be recognised and dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Issues generations per key; values are never reused across keys
#[derive(Debug)]
pub struct GenerationTracker<K> {
    current: HashMap<K, Generation>,
    next: u64,
}

impl<K: Eq + Hash> GenerationTracker<K> {
    pub fn new() -> Self {
        Self {
            current: HashMap::new(),
            next: 1,
        }
    }

    /// Start a new action for `key`, invalidating the previous one
    pub fn advance(&mut self, key: K) -> Generation {
        let generation = Generation(self.next);
        self.next += 1;
        self.current.insert(key, generation);
        generation
    }

    pub fn current(&self, key: &K) -> Option<Generation> {
        self.current.get(key).copied()
    }

    pub fn is_current(&self, key: &K, generation: Generation) -> bool {
        self.current(key) == Some(generation)
    }

    /// Forget `key`; every generation issued for it becomes stale
    pub fn retire(&mut self, key: &K) {
        self.current.remove(key);
    }
}

impl<K: Eq + Hash> Default for GenerationTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_supersedes_previous() {
        let mut tracker = GenerationTracker::new();

        let first = tracker.advance("alice");
        let second = tracker.advance("alice");

        assert!(second > first);
        assert!(!tracker.is_current(&"alice", first));
        assert!(tracker.is_current(&"alice", second));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut tracker = GenerationTracker::new();

        let a = tracker.advance("alice");
        let b = tracker.advance("bob");

        assert_ne!(a, b);
        assert!(tracker.is_current(&"alice", a));
        assert!(tracker.is_current(&"bob", b));
    }

    #[test]
    fn test_retire() {
        let mut tracker = GenerationTracker::new();
        let a = tracker.advance("alice");

        tracker.retire(&"alice");

        assert!(!tracker.is_current(&"alice", a));
        assert_eq!(tracker.current(&"alice"), None);

        // a fresh action never reuses a retired value
        let again = tracker.advance("alice");
        assert_ne!(again, a);
    }
}
