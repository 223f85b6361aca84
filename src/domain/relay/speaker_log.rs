//! Bounded conversation log
//!
//! Newest entry first. Once full, the oldest entry is evicted for each new
//! one (insertion order, not access order).

use crate::domain::shared::value_objects::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 25;

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedUtterance {
    pub from: PeerId,
    pub sender_name: String,
    /// Text as sent by the peer
    pub original: String,
    /// Text as heard locally (translated, or the original on fallback)
    pub heard: String,
    pub received_at: DateTime<Utc>,
}

impl RelayedUtterance {
    pub fn new(from: PeerId, sender_name: impl Into<String>, original: impl Into<String>, heard: impl Into<String>) -> Self {
        Self {
            from,
            sender_name: sender_name.into(),
            original: original.into(),
            heard: heard.into(),
            received_at: Utc::now(),
        }
    }

    /// `"{name}: {text}"` as displayed in the conversation panel
    pub fn line(&self) -> String {
        format!("{}: {}", self.sender_name, self.heard)
    }
}

#[derive(Debug, Clone)]
pub struct SpeakerLog {
    entries: VecDeque<RelayedUtterance>,
    capacity: usize,
}

impl SpeakerLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend `entry`; returns the evicted entry, if any
    pub fn push(&mut self, entry: RelayedUtterance) -> Option<RelayedUtterance> {
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Newest first
    pub fn entries(&self) -> impl Iterator<Item = &RelayedUtterance> {
        self.entries.iter()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(RelayedUtterance::line).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SpeakerLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(n: usize) -> RelayedUtterance {
        RelayedUtterance::new(PeerId::new("alice"), "Alice", format!("msg {}", n), format!("msg {}", n))
    }

    #[test]
    fn test_newest_first() {
        let mut log = SpeakerLog::default();
        log.push(RelayedUtterance::new(PeerId::new("alice"), "Alice", "hello", "hello"));
        log.push(RelayedUtterance::new(PeerId::new("bob"), "Bob", "hi", "やあ"));

        assert_eq!(log.lines(), vec!["Bob: やあ".to_string(), "Alice: hello".to_string()]);
    }

    #[test]
    fn test_evicts_oldest_after_capacity() {
        let mut log = SpeakerLog::default();
        for n in 0..25 {
            assert!(log.push(utterance(n)).is_none());
        }
        assert_eq!(log.len(), 25);

        // the 26th arrival drops what sat at index 24, the very first message
        let evicted = log.push(utterance(25)).unwrap();
        assert_eq!(evicted.original, "msg 0");
        assert_eq!(log.len(), 25);
        assert_eq!(log.entries().next().unwrap().original, "msg 25");
        assert_eq!(log.entries().last().unwrap().original, "msg 1");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut log = SpeakerLog::new(0);
        log.push(utterance(1));
        log.push(utterance(2));
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
