//! Call session domain events

use crate::domain::call::value_object::{CallRole, EndReason};
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::value_objects::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something that happened to one peer's call session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Call request sent to the peer
    Requested {
        peer_id: PeerId,
        occurred_at: DateTime<Utc>,
    },
    /// Both sides agreed to talk
    Accepted {
        peer_id: PeerId,
        role: CallRole,
        occurred_at: DateTime<Utc>,
    },
    /// Offer/answer exchange started
    Negotiating {
        peer_id: PeerId,
        occurred_at: DateTime<Utc>,
    },
    /// Remote media is flowing
    Active {
        peer_id: PeerId,
        occurred_at: DateTime<Utc>,
    },
    /// Session ended
    Terminated {
        peer_id: PeerId,
        reason: EndReason,
        occurred_at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            SessionEvent::Requested { peer_id, .. }
            | SessionEvent::Accepted { peer_id, .. }
            | SessionEvent::Negotiating { peer_id, .. }
            | SessionEvent::Active { peer_id, .. }
            | SessionEvent::Terminated { peer_id, .. } => peer_id,
        }
    }
}

impl DomainEvent for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Requested { .. } => "call.requested",
            SessionEvent::Accepted { .. } => "call.accepted",
            SessionEvent::Negotiating { .. } => "call.negotiating",
            SessionEvent::Active { .. } => "call.active",
            SessionEvent::Terminated { .. } => "call.terminated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Requested { occurred_at, .. }
            | SessionEvent::Accepted { occurred_at, .. }
            | SessionEvent::Negotiating { occurred_at, .. }
            | SessionEvent::Active { occurred_at, .. }
            | SessionEvent::Terminated { occurred_at, .. } => *occurred_at,
        }
    }
}
