//! Events published to the front end
//!
//! Fan-out over a `broadcast` channel; a front end subscribes before the
//! orchestrator starts so it sees startup notices too.

use crate::domain::call::{IncomingCallRequest, SessionEvent};
use crate::domain::directory::Participant;
use crate::domain::relay::RelayedUtterance;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{Language, PeerId};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Joined { id: PeerId, name: String },
    Left,
    RosterChanged(Vec<Participant>),
    Session(SessionEvent),
    /// The request at the head of the incoming queue, waiting for a decision
    IncomingCall(IncomingCallRequest),
    /// Request parked behind the one currently surfaced
    IncomingQueued { request: IncomingCallRequest, position: usize },
    /// The caller hung up before a decision was made
    IncomingWithdrawn { from: PeerId },
    Relayed(RelayedUtterance),
    AssistantReply { prompt: String, text: String },
    LanguageChanged { speak: Language, hear: Language },
    /// Transient information for the user
    Notice(String),
    /// Action-scoped failure; never affects unrelated sessions
    Error(DomainError),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AppEvent) {
        if self.tx.send(event).is_err() {
            debug!("No subscribers for app event");
        }
    }

    pub fn notice(&self, message: impl Into<String>) {
        self.publish(AppEvent::Notice(message.into()));
    }

    pub fn error(&self, error: DomainError) {
        self.publish(AppEvent::Error(error));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
