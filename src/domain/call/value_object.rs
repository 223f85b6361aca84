//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the call this participant is on; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    /// Hung up locally
    LocalHangup,
    /// The peer hung up or withdrew its request
    RemoteHangup,
    /// The callee declined
    Rejected,
    /// The callee already had a session with us
    Busy,
    /// Nobody answered the request in time
    Timeout,
    /// Out-of-sequence negotiation step
    NegotiationFailed(String),
    /// Connectivity or media failure reported by the connection
    ConnectionFailed(String),
    /// The signaling channel reconnected; remote state is unknowable
    SignalingLost,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalHangup => write!(f, "local hangup"),
            EndReason::RemoteHangup => write!(f, "remote hangup"),
            EndReason::Rejected => write!(f, "rejected"),
            EndReason::Busy => write!(f, "busy"),
            EndReason::Timeout => write!(f, "no answer"),
            EndReason::NegotiationFailed(e) => write!(f, "negotiation failed: {}", e),
            EndReason::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            EndReason::SignalingLost => write!(f, "signaling lost"),
        }
    }
}

/// Call session state
///
/// `Idle` is not represented: a peer without a session record is idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Call request sent, awaiting accept or reject
    Requesting,
    /// Both sides agreed to talk, no connection negotiated yet
    Accepted,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Descriptions exchanged and remote media flowing
    Active,
    /// Session is over
    Terminated(EndReason),
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            (Requesting, Accepted) => true,
            (Accepted, Negotiating) => true,
            (Negotiating, Active) => true,

            // Any live state may end
            (Requesting | Accepted | Negotiating | Active, Terminated(_)) => true,

            // Can't transition from Terminated
            (Terminated(_), _) => false,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallState::Requesting => "requesting",
            CallState::Accepted => "accepted",
            CallState::Negotiating => "negotiating",
            CallState::Active => "active",
            CallState::Terminated(_) => "terminated",
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Terminated(_))
    }

    /// States in which connectivity hints for the peer are meaningful
    pub fn accepts_candidates(&self) -> bool {
        matches!(
            self,
            CallState::Accepted | CallState::Negotiating | CallState::Active
        )
    }
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque negotiation blob, shaped like a browser `RTCSessionDescription`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Opaque connectivity hint, shaped like a browser `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}
