//! Signaling wire format
//!
//! Every frame is a JSON envelope `{type, to, from, payload}`. `from` is
//! stamped by the rendezvous service on delivery; `to` is absent for
//! messages addressed to the directory itself and `"*"` for broadcasts.

use crate::domain::call::{IceCandidate, SessionDescription};
use crate::domain::directory::Participant;
use crate::domain::shared::value_objects::PeerId;
use serde::{Deserialize, Serialize};

/// Address used on the wire for "every connected participant"
pub const BROADCAST_ADDRESS: &str = "*";

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SignalingMessage {
    /// Announce ourselves to the directory
    #[serde(rename = "join")]
    Join { name: String },
    /// Full roster from the directory
    #[serde(rename = "peer-list")]
    PeerList(Vec<Participant>),
    /// A participant appeared
    #[serde(rename = "peer-joined")]
    PeerJoined(Participant),
    /// A participant went away
    #[serde(rename = "peer-left")]
    PeerLeft { id: PeerId },
    /// Ask the recipient for a call
    #[serde(rename = "call-request")]
    CallRequest {
        #[serde(rename = "fromName")]
        from_name: String,
    },
    #[serde(rename = "call-accept")]
    CallAccept,
    #[serde(rename = "call-reject")]
    CallReject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// End the call, or withdraw a request that was not answered yet
    #[serde(rename = "hangup")]
    Hangup,
    #[serde(rename = "offer")]
    Offer { sdp: SessionDescription },
    #[serde(rename = "answer")]
    Answer { sdp: SessionDescription },
    #[serde(rename = "ice_candidate")]
    IceCandidate { candidate: IceCandidate },
    /// Recognized utterance for the recipients to synthesize
    #[serde(rename = "peer-text")]
    PeerText { text: String, name: String },
    /// Error reported by the rendezvous service
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Join { .. } => "join",
            SignalingMessage::PeerList(_) => "peer-list",
            SignalingMessage::PeerJoined(_) => "peer-joined",
            SignalingMessage::PeerLeft { .. } => "peer-left",
            SignalingMessage::CallRequest { .. } => "call-request",
            SignalingMessage::CallAccept => "call-accept",
            SignalingMessage::CallReject { .. } => "call-reject",
            SignalingMessage::Hangup => "hangup",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::PeerText { .. } => "peer-text",
            SignalingMessage::Error { .. } => "error",
        }
    }

    /// Call-control and negotiation traffic that belongs to one peer's session
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            SignalingMessage::CallRequest { .. }
                | SignalingMessage::CallAccept
                | SignalingMessage::CallReject { .. }
                | SignalingMessage::Hangup
                | SignalingMessage::Offer { .. }
                | SignalingMessage::Answer { .. }
                | SignalingMessage::IceCandidate { .. }
        )
    }
}

/// Who a message is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// The rendezvous service itself
    Directory,
    /// One participant
    Peer(PeerId),
    /// Every participant, at the directory's discretion
    Everyone,
}

impl Recipient {
    fn wire_address(&self) -> Option<PeerId> {
        match self {
            Recipient::Directory => None,
            Recipient::Peer(id) => Some(id.clone()),
            Recipient::Everyone => Some(PeerId::new(BROADCAST_ADDRESS)),
        }
    }

    pub fn from_wire(to: Option<&PeerId>) -> Self {
        match to {
            None => Recipient::Directory,
            Some(id) if id.as_str() == BROADCAST_ADDRESS => Recipient::Everyone,
            Some(id) => Recipient::Peer(id.clone()),
        }
    }
}

/// One signaling frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
    #[serde(flatten)]
    pub message: SignalingMessage,
}

impl Envelope {
    pub fn new(from: PeerId, to: Recipient, message: SignalingMessage) -> Self {
        Self {
            to: to.wire_address(),
            from: Some(from),
            message,
        }
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::from_wire(self.to.as_ref())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
