//! Directory client
//!
//! Holds this participant's identity and the live roster of everybody else.
//! The roster is a best-effort stream: each update is applied as it comes,
//! last write wins, nothing is retried.

use crate::domain::directory::entity::Participant;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::PeerId;
use std::collections::HashMap;
use tracing::{debug, info};

/// Presence notification from the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterUpdate {
    /// Full replacement of the roster
    Snapshot(Vec<Participant>),
    /// A participant joined
    Joined(Participant),
    /// A participant left
    Left(PeerId),
}

#[derive(Debug)]
pub struct DirectoryClient {
    self_id: PeerId,
    display_name: Option<String>,
    roster: HashMap<PeerId, Participant>,
}

impl DirectoryClient {
    /// `self_id` is the id the rendezvous service knows this process by
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            display_name: None,
            roster: HashMap::new(),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn is_joined(&self) -> bool {
        self.display_name.is_some()
    }

    /// Join under `name`
    pub fn join(&mut self, name: &str) -> Result<PeerId> {
        if self.is_joined() {
            return Err(DomainError::AlreadyJoined);
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Directory("display name must not be empty".to_string()));
        }

        self.display_name = Some(name.to_string());
        info!("Joined directory as {} ({})", name, self.self_id);
        Ok(self.self_id.clone())
    }

    /// Leave the directory; the roster view is dropped with it
    pub fn leave(&mut self) -> Result<()> {
        if self.display_name.take().is_none() {
            return Err(DomainError::NotJoined);
        }

        self.roster.clear();
        info!("Left directory ({})", self.self_id);
        Ok(())
    }

    /// Everybody currently announced, excluding self, ordered by label
    pub fn current_roster(&self) -> Vec<Participant> {
        let mut peers: Vec<Participant> = self.roster.values().cloned().collect();
        peers.sort_by(|a, b| a.label().cmp(b.label()).then_with(|| a.id.cmp(&b.id)));
        peers
    }

    pub fn lookup(&self, peer_id: &PeerId) -> Option<&Participant> {
        self.roster.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.roster.contains_key(peer_id)
    }

    /// Apply one presence notification
    pub fn apply(&mut self, update: RosterUpdate) {
        match update {
            RosterUpdate::Snapshot(peers) => {
                self.roster = peers
                    .into_iter()
                    .filter(|p| p.id != self.self_id)
                    .map(|p| (p.id.clone(), p))
                    .collect();
                debug!("Roster replaced: {} peers", self.roster.len());
            }
            RosterUpdate::Joined(peer) => {
                if peer.id != self.self_id {
                    debug!("Peer joined: {} ({})", peer.label(), peer.id);
                    self.roster.insert(peer.id.clone(), peer);
                }
            }
            RosterUpdate::Left(peer_id) => {
                if self.roster.remove(&peer_id).is_some() {
                    debug!("Peer left: {}", peer_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> Participant {
        Participant::new(PeerId::new(id), name)
    }

    #[test]
    fn test_join_twice_fails() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));

        assert_eq!(directory.join("Alice").unwrap(), PeerId::new("me"));
        assert_eq!(directory.join("Alice"), Err(DomainError::AlreadyJoined));

        directory.leave().unwrap();
        assert!(directory.join("Alice again").is_ok());
    }

    #[test]
    fn test_join_rejects_blank_name() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));
        assert!(matches!(directory.join("   "), Err(DomainError::Directory(_))));
        assert!(!directory.is_joined());
    }

    #[test]
    fn test_leave_without_join() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));
        assert_eq!(directory.leave(), Err(DomainError::NotJoined));
    }

    #[test]
    fn test_snapshot_excludes_self() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));
        directory.apply(RosterUpdate::Snapshot(vec![
            peer("me", "Me"),
            peer("b", "Bob"),
            peer("a", "Alice"),
        ]));

        let roster = directory.current_roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].display_name, "Alice");
        assert_eq!(roster[1].display_name, "Bob");
    }

    #[test]
    fn test_last_write_wins() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));
        directory.apply(RosterUpdate::Snapshot(vec![peer("a", "Alice"), peer("b", "Bob")]));
        directory.apply(RosterUpdate::Snapshot(vec![peer("c", "Carol")]));

        let roster = directory.current_roster();
        assert_eq!(roster, vec![peer("c", "Carol")]);
    }

    #[test]
    fn test_join_and_leave_notifications() {
        let mut directory = DirectoryClient::new(PeerId::new("me"));
        directory.apply(RosterUpdate::Joined(peer("a", "Alice")));
        directory.apply(RosterUpdate::Joined(peer("me", "Me")));
        assert!(directory.contains(&PeerId::new("a")));
        assert_eq!(directory.current_roster().len(), 1);

        directory.apply(RosterUpdate::Left(PeerId::new("a")));
        assert!(directory.current_roster().is_empty());

        // leaving twice is harmless
        directory.apply(RosterUpdate::Left(PeerId::new("a")));
    }
}
