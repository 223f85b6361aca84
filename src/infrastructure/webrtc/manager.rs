//! Connection Lifecycle Manager
//!
//! Exclusively owns the peer id -> connection map, the per-peer playback
//! sinks and the candidates that arrive before a remote description is in
//! place. Everything else reaches a connection through a
//! [`ConnectionHandle`] and the operations below.

use crate::domain::call::{IceCandidate, SdpKind, SessionDescription};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{ConnectionId, PeerId};
use crate::infrastructure::metrics;
use crate::infrastructure::webrtc::connection::{
    LinkState, LocalTrack, PeerConnection, PeerConnectionFactory, PlatformEvent, RemoteTrack,
};
use crate::infrastructure::webrtc::sink::{AudioOutput, PlaybackSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Names one connection object; stale handles are simply not found
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub peer_id: PeerId,
    pub id: ConnectionId,
}

/// Reported upward to whoever drives the sessions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Local connectivity hint to forward to the peer
    LocalCandidate {
        handle: ConnectionHandle,
        candidate: IceCandidate,
    },
    /// A remote track now plays through the peer's sink
    TrackRouted {
        handle: ConnectionHandle,
        track_id: String,
        first: bool,
    },
    /// Connectivity established
    Connected { handle: ConnectionHandle },
    /// Connectivity or media failure; fatal to that peer's session only
    Failed {
        handle: ConnectionHandle,
        reason: String,
    },
}

impl ConnectionEvent {
    pub fn handle(&self) -> &ConnectionHandle {
        match self {
            ConnectionEvent::LocalCandidate { handle, .. }
            | ConnectionEvent::TrackRouted { handle, .. }
            | ConnectionEvent::Connected { handle }
            | ConnectionEvent::Failed { handle, .. } => handle,
        }
    }
}

/// Where a connection is in the offer/answer dance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Fresh,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

struct Negotiation {
    phase: NegotiationPhase,
    remote_description_set: bool,
    /// Candidates waiting for the remote description, in arrival order
    deferred: Vec<IceCandidate>,
}

/// The peer's single playback sink, opened lazily on the first track
struct SinkSlot {
    peer_id: PeerId,
    output: Arc<dyn AudioOutput>,
    sink: StdMutex<Option<Arc<dyn PlaybackSink>>>,
}

impl SinkSlot {
    /// Returns whether this was the first track for the peer
    fn route(&self, track: RemoteTrack) -> bool {
        let Ok(mut slot) = self.sink.lock() else {
            return false;
        };
        let first = slot.is_none();
        let sink = slot
            .get_or_insert_with(|| self.output.open_sink(&self.peer_id))
            .clone();
        drop(slot);

        sink.attach(track);
        first
    }

    fn close(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            if let Some(sink) = slot.take() {
                sink.close();
            }
        }
    }

    fn track_count(&self) -> usize {
        self.sink
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|s| s.track_count()))
            .unwrap_or(0)
    }
}

struct ManagedConnection {
    handle: ConnectionHandle,
    connection: Arc<dyn PeerConnection>,
    negotiation: Mutex<Negotiation>,
    sink: Arc<SinkSlot>,
    pump: AbortHandle,
}

pub struct ConnectionManager {
    factory: Arc<dyn PeerConnectionFactory>,
    output: Arc<dyn AudioOutput>,
    connections: RwLock<HashMap<PeerId, Arc<ManagedConnection>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        output: Arc<dyn AudioOutput>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            factory,
            output,
            connections: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create the connection object for `peer_id` and attach `local_tracks`
    ///
    /// Tracks acquired later are never attached to this connection.
    pub async fn create_connection(&self, peer_id: &PeerId, local_tracks: &[LocalTrack]) -> Result<ConnectionHandle> {
        if self.connections.read().await.contains_key(peer_id) {
            return Err(DomainError::Negotiation(format!(
                "connection for {} already exists",
                peer_id
            )));
        }

        let handle = ConnectionHandle {
            peer_id: peer_id.clone(),
            id: ConnectionId::new(),
        };

        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let connection = self.factory.create(peer_id, platform_tx).await?;

        for track in local_tracks {
            if let Err(e) = connection.add_local_track(track).await {
                let _ = connection.close().await;
                return Err(e);
            }
        }

        let sink = Arc::new(SinkSlot {
            peer_id: peer_id.clone(),
            output: self.output.clone(),
            sink: StdMutex::new(None),
        });

        let pump = tokio::spawn(pump_platform_events(
            handle.clone(),
            platform_rx,
            sink.clone(),
            self.events.clone(),
        ))
        .abort_handle();

        let managed = Arc::new(ManagedConnection {
            handle: handle.clone(),
            connection,
            negotiation: Mutex::new(Negotiation {
                phase: NegotiationPhase::Fresh,
                remote_description_set: false,
                deferred: Vec::new(),
            }),
            sink,
            pump,
        });

        let mut connections = self.connections.write().await;
        if connections.contains_key(peer_id) {
            drop(connections);
            release(&managed).await;
            return Err(DomainError::Negotiation(format!(
                "connection for {} already exists",
                peer_id
            )));
        }
        connections.insert(peer_id.clone(), managed);
        metrics::set_connections(connections.len());

        info!(
            "Created connection {} for {} with {} local track(s)",
            handle.id,
            peer_id,
            local_tracks.len()
        );
        Ok(handle)
    }

    /// Create an offer and install it locally
    pub async fn create_offer(&self, handle: &ConnectionHandle) -> Result<SessionDescription> {
        let managed = self.lookup(handle).await?;
        let mut negotiation = managed.negotiation.lock().await;

        match negotiation.phase {
            NegotiationPhase::Fresh | NegotiationPhase::Stable => {}
            phase => {
                return Err(DomainError::Negotiation(format!(
                    "cannot create offer in phase {:?}",
                    phase
                )))
            }
        }

        let offer = managed.connection.create_offer().await?;
        negotiation.phase = NegotiationPhase::HaveLocalOffer;

        debug!("Created offer on connection {} for {}", handle.id, handle.peer_id);
        Ok(offer)
    }

    /// Apply the remote `offer` and produce the local answer
    pub async fn create_answer(&self, handle: &ConnectionHandle, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.kind != SdpKind::Offer {
            return Err(DomainError::Negotiation("answer requires a remote offer".to_string()));
        }

        let managed = self.lookup(handle).await?;
        let mut negotiation = managed.negotiation.lock().await;

        match negotiation.phase {
            NegotiationPhase::Fresh | NegotiationPhase::Stable => {}
            phase => {
                return Err(DomainError::Negotiation(format!(
                    "cannot answer in phase {:?}",
                    phase
                )))
            }
        }

        managed.connection.set_remote_description(offer).await?;
        negotiation.phase = NegotiationPhase::HaveRemoteOffer;
        negotiation.remote_description_set = true;
        flush_deferred(&managed, &mut negotiation).await;

        let answer = managed.connection.create_answer().await?;
        negotiation.phase = NegotiationPhase::Stable;

        debug!("Created answer on connection {} for {}", handle.id, handle.peer_id);
        Ok(answer)
    }

    /// Apply a remote description outside of `create_answer`
    ///
    /// An answer is only valid after our own offer; an offer only in a
    /// settled phase.
    pub async fn set_remote_description(&self, handle: &ConnectionHandle, description: SessionDescription) -> Result<()> {
        let managed = self.lookup(handle).await?;
        let mut negotiation = managed.negotiation.lock().await;

        let next = match (negotiation.phase, description.kind) {
            (NegotiationPhase::HaveLocalOffer, SdpKind::Answer) => NegotiationPhase::Stable,
            (NegotiationPhase::Fresh | NegotiationPhase::Stable, SdpKind::Offer) => NegotiationPhase::HaveRemoteOffer,
            (phase, kind) => {
                return Err(DomainError::Negotiation(format!(
                    "unexpected remote {:?} in phase {:?}",
                    kind, phase
                )))
            }
        };

        managed.connection.set_remote_description(description).await?;
        negotiation.phase = next;
        negotiation.remote_description_set = true;
        flush_deferred(&managed, &mut negotiation).await;

        debug!("Remote description set on connection {} for {}", handle.id, handle.peer_id);
        Ok(())
    }

    /// Apply a remote connectivity hint
    ///
    /// Refused before negotiation has started; held back until the remote
    /// description is in place.
    pub async fn add_candidate(&self, handle: &ConnectionHandle, candidate: IceCandidate) -> Result<()> {
        let managed = self.lookup(handle).await?;
        let mut negotiation = managed.negotiation.lock().await;

        match negotiation.phase {
            NegotiationPhase::Fresh => Err(DomainError::Negotiation(
                "candidate before negotiation started".to_string(),
            )),
            NegotiationPhase::Closed => Err(DomainError::Negotiation("connection closed".to_string())),
            _ if !negotiation.remote_description_set => {
                debug!("Deferring candidate for {} until remote description", handle.peer_id);
                negotiation.deferred.push(candidate);
                Ok(())
            }
            _ => managed.connection.add_ice_candidate(candidate).await,
        }
    }

    /// Release the connection and the peer's playback sink
    ///
    /// Returns `false` when the handle is already gone; calling it again is a no-op.
    pub async fn terminate(&self, handle: &ConnectionHandle) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(&handle.peer_id) {
                Some(existing) if existing.handle.id == handle.id => {
                    let removed = connections.remove(&handle.peer_id);
                    metrics::set_connections(connections.len());
                    removed
                }
                _ => None,
            }
        };

        match removed {
            Some(managed) => {
                managed.negotiation.lock().await.phase = NegotiationPhase::Closed;
                release(&managed).await;
                info!("Terminated connection {} for {}", handle.id, handle.peer_id);
                true
            }
            None => false,
        }
    }

    /// Release every connection, e.g. on shutdown
    pub async fn terminate_all(&self) {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .read()
            .await
            .values()
            .map(|m| m.handle.clone())
            .collect();

        for handle in handles {
            self.terminate(&handle).await;
        }
    }

    pub async fn phase(&self, handle: &ConnectionHandle) -> Option<NegotiationPhase> {
        let managed = self.lookup(handle).await.ok()?;
        let phase = managed.negotiation.lock().await.phase;
        Some(phase)
    }

    /// Tracks currently routed into the peer's sink
    pub async fn remote_track_count(&self, peer_id: &PeerId) -> usize {
        self.connections
            .read()
            .await
            .get(peer_id)
            .map(|m| m.sink.track_count())
            .unwrap_or(0)
    }

    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn lookup(&self, handle: &ConnectionHandle) -> Result<Arc<ManagedConnection>> {
        let connections = self.connections.read().await;
        match connections.get(&handle.peer_id) {
            Some(managed) if managed.handle.id == handle.id => Ok(managed.clone()),
            _ => Err(DomainError::Negotiation(format!(
                "no connection {} for {}",
                handle.id, handle.peer_id
            ))),
        }
    }
}

/// A rejected hint is logged and skipped; the rest are still applied
async fn flush_deferred(managed: &ManagedConnection, negotiation: &mut Negotiation) {
    for candidate in std::mem::take(&mut negotiation.deferred) {
        if let Err(e) = managed.connection.add_ice_candidate(candidate).await {
            warn!(
                "Deferred candidate for {} on connection {} rejected: {}",
                managed.handle.peer_id, managed.handle.id, e
            );
        }
    }
}

async fn release(managed: &ManagedConnection) {
    managed.pump.abort();
    managed.sink.close();
    if let Err(e) = managed.connection.close().await {
        warn!("Closing connection {} for {} failed: {}", managed.handle.id, managed.handle.peer_id, e);
    }
}

/// Translate platform callbacks into upward events and route remote tracks
async fn pump_platform_events(
    handle: ConnectionHandle,
    mut platform: mpsc::UnboundedReceiver<PlatformEvent>,
    sink: Arc<SinkSlot>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    while let Some(event) = platform.recv().await {
        let upward = match event {
            PlatformEvent::LocalCandidate(candidate) => ConnectionEvent::LocalCandidate {
                handle: handle.clone(),
                candidate,
            },
            PlatformEvent::RemoteTrack(track) => {
                let track_id = track.id.clone();
                let first = sink.route(track);
                ConnectionEvent::TrackRouted {
                    handle: handle.clone(),
                    track_id,
                    first,
                }
            }
            PlatformEvent::LinkState(LinkState::Connected) => ConnectionEvent::Connected {
                handle: handle.clone(),
            },
            PlatformEvent::LinkState(LinkState::Failed) => ConnectionEvent::Failed {
                handle: handle.clone(),
                reason: "connectivity lost".to_string(),
            },
            PlatformEvent::LinkState(state) => {
                debug!("Connection {} for {} is {:?}", handle.id, handle.peer_id, state);
                if state == LinkState::Closed {
                    break;
                }
                continue;
            }
        };

        if events.send(upward).is_err() {
            break;
        }
    }
}
