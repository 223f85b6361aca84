//! In-process rendezvous hub
//!
//! Plays the directory and relay role for any number of local channels:
//! keeps the roster, answers `join` with a fresh `peer-list` to everybody,
//! and routes addressed frames to their recipient with `from` stamped.
//! Used for loopback sessions and tests.

use crate::domain::directory::Participant;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::PeerId;
use crate::infrastructure::signaling::channel::{ChannelEvent, ChannelEventSender, ChannelEvents, SignalingChannel};
use crate::infrastructure::signaling::message::{Envelope, Recipient, SignalingMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

struct HubPeer {
    name: Option<String>,
    tx: ChannelEventSender,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    peers: Arc<RwLock<HashMap<PeerId, HubPeer>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new participant and return its channel and dispatcher queue
    pub async fn connect(&self, peer_id: PeerId) -> (Arc<MemoryChannel>, ChannelEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .write()
            .await
            .insert(peer_id.clone(), HubPeer { name: None, tx });

        info!("Memory hub: {} connected", peer_id);
        let channel = Arc::new(MemoryChannel {
            local_id: peer_id,
            hub: self.clone(),
        });
        (channel, rx)
    }

    /// Detach a participant and tell everybody else
    pub async fn disconnect(&self, peer_id: &PeerId) {
        let removed = self.peers.write().await.remove(peer_id);
        if removed.is_some() {
            info!("Memory hub: {} disconnected", peer_id);
            self.broadcast_roster().await;
        }
    }

    /// Simulate a transport bounce for `peer_id`
    pub async fn bounce(&self, peer_id: &PeerId) {
        let peers = self.peers.read().await;
        if let Some(peer) = peers.get(peer_id) {
            let _ = peer.tx.send(ChannelEvent::Disconnected);
            let _ = peer.tx.send(ChannelEvent::Reconnected);
        }
    }

    pub async fn roster(&self) -> Vec<Participant> {
        let peers = self.peers.read().await;
        let mut roster: Vec<Participant> = peers
            .iter()
            .filter_map(|(id, p)| p.name.as_ref().map(|name| Participant::new(id.clone(), name.clone())))
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        roster
    }

    async fn broadcast_roster(&self) {
        let roster = self.roster().await;
        let peers = self.peers.read().await;
        for peer in peers.values() {
            let envelope = Envelope {
                to: None,
                from: None,
                message: SignalingMessage::PeerList(roster.clone()),
            };
            let _ = peer.tx.send(ChannelEvent::Message(envelope));
        }
    }

    async fn route(&self, from: &PeerId, to: Recipient, message: SignalingMessage) -> Result<()> {
        match (&to, &message) {
            (Recipient::Directory, SignalingMessage::Join { name }) => {
                {
                    let mut peers = self.peers.write().await;
                    let peer = peers
                        .get_mut(from)
                        .ok_or_else(|| DomainError::SignalingDelivery(format!("{} is not connected", from)))?;
                    peer.name = Some(name.clone());
                }
                debug!("Memory hub: {} joined as {}", from, name);
                self.broadcast_roster().await;
                Ok(())
            }
            (Recipient::Directory, other) => {
                warn!("Memory hub: ignoring {} addressed to the directory", other.kind());
                Ok(())
            }
            (Recipient::Peer(target), _) => {
                let peers = self.peers.read().await;
                match peers.get(target) {
                    Some(peer) => {
                        let envelope = Envelope::new(from.clone(), to.clone(), message);
                        peer.tx
                            .send(ChannelEvent::Message(envelope))
                            .map_err(|_| DomainError::SignalingDelivery(format!("{} is gone", target)))
                    }
                    None => {
                        // Same courtesy as a real rendezvous: tell the sender
                        if let Some(sender) = peers.get(from) {
                            let error = SignalingMessage::Error {
                                code: "PEER_NOT_FOUND".to_string(),
                                message: format!("Peer {} not found", target),
                            };
                            let _ = sender.tx.send(ChannelEvent::Message(Envelope {
                                to: Some(from.clone()),
                                from: None,
                                message: error,
                            }));
                        }
                        Ok(())
                    }
                }
            }
            (Recipient::Everyone, _) => {
                let peers = self.peers.read().await;
                for (id, peer) in peers.iter().filter(|(id, _)| *id != from) {
                    let envelope = Envelope::new(from.clone(), Recipient::Peer(id.clone()), message.clone());
                    let _ = peer.tx.send(ChannelEvent::Message(envelope));
                }
                Ok(())
            }
        }
    }
}

/// One participant's end of a [`MemoryHub`]
pub struct MemoryChannel {
    local_id: PeerId,
    hub: MemoryHub,
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn send(&self, to: Recipient, message: SignalingMessage) -> Result<()> {
        if !self.hub.peers.read().await.contains_key(&self.local_id) {
            return Err(DomainError::SignalingDelivery("channel is disconnected".to_string()));
        }
        self.hub.route(&self.local_id, to, message).await
    }
}
