//! Incoming call requests waiting for a local decision
//!
//! Only the head of the queue is surfaced to the user. Requests from other
//! peers that arrive meanwhile wait their turn; a second request from a peer
//! that is already queued is a duplicate and is ignored.

use crate::domain::shared::value_objects::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallRequest {
    pub from: PeerId,
    pub from_name: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingCallRequest {
    pub fn new(from: PeerId, from_name: impl Into<String>) -> Self {
        Self {
            from,
            from_name: from_name.into(),
            received_at: Utc::now(),
        }
    }

    pub fn label(&self) -> &str {
        if self.from_name.trim().is_empty() {
            self.from.as_str()
        } else {
            &self.from_name
        }
    }
}

/// Outcome of offering a request to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Became the head; surface it now
    Surfaced,
    /// Waiting behind another request
    Queued { position: usize },
    /// Same peer already waiting
    Duplicate,
}

#[derive(Debug, Default)]
pub struct IncomingCallQueue {
    requests: VecDeque<IncomingCallRequest>,
}

impl IncomingCallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: IncomingCallRequest) -> Enqueued {
        if self.contains(&request.from) {
            return Enqueued::Duplicate;
        }

        self.requests.push_back(request);
        match self.requests.len() {
            1 => Enqueued::Surfaced,
            n => Enqueued::Queued { position: n - 1 },
        }
    }

    /// The request currently awaiting a decision
    pub fn current(&self) -> Option<&IncomingCallRequest> {
        self.requests.front()
    }

    /// Remove the current request to decide on it
    pub fn take_current(&mut self) -> Option<IncomingCallRequest> {
        self.requests.pop_front()
    }

    /// Withdraw whatever `peer_id` has queued; returns whether it was the head
    pub fn withdraw(&mut self, peer_id: &PeerId) -> Option<bool> {
        let index = self.requests.iter().position(|r| &r.from == peer_id)?;
        self.requests.remove(index);
        Some(index == 0)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.requests.iter().any(|r| &r.from == peer_id)
    }

    /// Head first
    pub fn iter(&self) -> impl Iterator<Item = &IncomingCallRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) -> Vec<IncomingCallRequest> {
        self.requests.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> IncomingCallRequest {
        IncomingCallRequest::new(PeerId::new(id), id.to_uppercase())
    }

    #[test]
    fn test_fifo_surfacing() {
        let mut queue = IncomingCallQueue::new();

        assert_eq!(queue.push(request("x")), Enqueued::Surfaced);
        assert_eq!(queue.push(request("y")), Enqueued::Queued { position: 1 });
        assert_eq!(queue.current().unwrap().from, PeerId::new("x"));

        let decided = queue.take_current().unwrap();
        assert_eq!(decided.from, PeerId::new("x"));
        assert_eq!(queue.current().unwrap().from, PeerId::new("y"));
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let mut queue = IncomingCallQueue::new();
        queue.push(request("x"));

        assert_eq!(queue.push(request("x")), Enqueued::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_withdraw() {
        let mut queue = IncomingCallQueue::new();
        queue.push(request("x"));
        queue.push(request("y"));

        assert_eq!(queue.withdraw(&PeerId::new("y")), Some(false));
        assert_eq!(queue.withdraw(&PeerId::new("x")), Some(true));
        assert_eq!(queue.withdraw(&PeerId::new("x")), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_label() {
        let unnamed = IncomingCallRequest::new(PeerId::new("p9"), "");
        assert_eq!(unnamed.label(), "p9");
    }
}
