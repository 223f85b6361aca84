//! Call session aggregate root

use crate::domain::call::event::SessionEvent;
use crate::domain::call::value_object::{CallRole, CallState, EndReason, IceCandidate};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::generation::Generation;
use crate::domain::shared::value_objects::{ConnectionId, PeerId};
use chrono::{DateTime, Utc};

/// What to do with a connectivity hint that just arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// No connection object yet; held in `pending_candidates`
    Buffered,
    /// Hand it to this connection now
    Apply(ConnectionId),
}

/// Call session aggregate root
///
/// One per peer. The state only ever moves forward; calling the same peer
/// again after termination builds a new `CallSession` that replaces this one.
#[derive(Debug, Clone)]
pub struct CallSession {
    peer_id: PeerId,
    peer_name: String,
    role: CallRole,
    state: CallState,
    /// Stamp used to recognise stale completions for this peer
    generation: Generation,
    /// Handle of the negotiated connection, owned by the connection manager
    connection: Option<ConnectionId>,
    /// Hints that arrived before the connection object existed, in arrival order
    pending_candidates: Vec<IceCandidate>,
    /// Number of local audio tracks attached when the connection was created
    local_track_count: usize,
    started_at: DateTime<Utc>,
    active_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    events: Vec<SessionEvent>,
}

impl CallSession {
    /// Outgoing call: we just sent a call request
    pub fn outgoing(peer_id: PeerId, peer_name: impl Into<String>, generation: Generation) -> Self {
        let mut session = Self::blank(peer_id, peer_name.into(), CallRole::Caller, CallState::Requesting, generation);
        session.record_event(SessionEvent::Requested {
            peer_id: session.peer_id.clone(),
            occurred_at: session.started_at,
        });
        session
    }

    /// Incoming call the local user accepted; waits for the caller's offer
    pub fn accepted_incoming(peer_id: PeerId, peer_name: impl Into<String>, generation: Generation) -> Self {
        let mut session = Self::blank(peer_id, peer_name.into(), CallRole::Callee, CallState::Accepted, generation);
        session.record_event(SessionEvent::Accepted {
            peer_id: session.peer_id.clone(),
            role: CallRole::Callee,
            occurred_at: session.started_at,
        });
        session
    }

    fn blank(peer_id: PeerId, peer_name: String, role: CallRole, state: CallState, generation: Generation) -> Self {
        Self {
            peer_id,
            peer_name,
            role,
            state,
            generation,
            connection: None,
            pending_candidates: Vec::new(),
            local_track_count: 0,
            started_at: Utc::now(),
            active_at: None,
            ended_at: None,
            events: Vec::new(),
        }
    }

    /// The callee accepted our request
    pub fn remote_accepted(&mut self) -> Result<()> {
        if self.role != CallRole::Caller {
            return Err(DomainError::InvalidStateTransition(
                "only the caller can receive an accept".to_string(),
            ));
        }
        self.transition_to(CallState::Accepted)?;

        self.record_event(SessionEvent::Accepted {
            peer_id: self.peer_id.clone(),
            role: self.role,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    /// Offer/answer exchange starts
    ///
    /// Re-entrant: a renegotiating offer on a session that is already past
    /// `Accepted` leaves the state untouched.
    pub fn begin_negotiation(&mut self) -> Result<()> {
        match self.state {
            CallState::Negotiating | CallState::Active => Ok(()),
            _ => {
                self.transition_to(CallState::Negotiating)?;
                self.record_event(SessionEvent::Negotiating {
                    peer_id: self.peer_id.clone(),
                    occurred_at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    /// Remote media started flowing into the peer's playback sink
    ///
    /// Returns whether the session just became `Active`.
    pub fn media_started(&mut self) -> Result<bool> {
        match self.state {
            CallState::Active => Ok(false),
            CallState::Negotiating => {
                self.transition_to(CallState::Active)?;
                let now = Utc::now();
                self.active_at = Some(now);
                self.record_event(SessionEvent::Active {
                    peer_id: self.peer_id.clone(),
                    occurred_at: now,
                });
                Ok(true)
            }
            _ => Err(DomainError::InvalidStateTransition(format!(
                "media cannot start while {}",
                self.state.as_str()
            ))),
        }
    }

    /// Record the connection object created for this session
    ///
    /// Returns the buffered hints, in arrival order, for replay.
    pub fn attach_connection(&mut self, connection: ConnectionId, local_track_count: usize) -> Vec<IceCandidate> {
        self.connection = Some(connection);
        self.local_track_count = local_track_count;
        std::mem::take(&mut self.pending_candidates)
    }

    /// Route a connectivity hint from the peer
    pub fn receive_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateDisposition> {
        if !self.state.accepts_candidates() {
            return Err(DomainError::InvalidStateTransition(format!(
                "candidate not expected while {}",
                self.state.as_str()
            )));
        }

        match self.connection {
            Some(connection) => Ok(CandidateDisposition::Apply(connection)),
            None => {
                self.pending_candidates.push(candidate);
                Ok(CandidateDisposition::Buffered)
            }
        }
    }

    /// End the session
    ///
    /// Idempotent: returns `false` and changes nothing if already terminated.
    pub fn terminate(&mut self, reason: EndReason) -> bool {
        if self.state.is_terminated() {
            return false;
        }

        let ended_at = Utc::now();
        self.state = CallState::Terminated(reason.clone());
        self.ended_at = Some(ended_at);
        self.pending_candidates.clear();

        self.record_event(SessionEvent::Terminated {
            peer_id: self.peer_id.clone(),
            reason,
            occurred_at: ended_at,
        });
        true
    }

    fn transition_to(&mut self, new_state: CallState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    fn record_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    pub fn local_track_count(&self) -> usize {
        self.local_track_count
    }

    pub fn started_at(&self) -> &DateTime<Utc> {
        &self.started_at
    }

    pub fn active_at(&self) -> Option<&DateTime<Utc>> {
        self.active_at.as_ref()
    }

    pub fn ended_at(&self) -> Option<&DateTime<Utc>> {
        self.ended_at.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminated()
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminated()
    }
}
