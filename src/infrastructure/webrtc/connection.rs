//! Platform connection primitive
//!
//! The negotiated connection object is supplied by the platform. These
//! traits are the seam: the webrtc-rs binding lives in `rtc`, tests plug in
//! recording fakes. Everything the platform reports asynchronously (local
//! candidates, remote tracks, link state) flows back as [`PlatformEvent`]s.

use crate::domain::call::{IceCandidate, SessionDescription};
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::PeerId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Outbound audio source, shared read-only by every connection
#[derive(Clone)]
pub struct LocalTrack {
    source: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(source: Arc<TrackLocalStaticSample>) -> Self {
        Self { source }
    }

    pub fn id(&self) -> &str {
        self.source.id()
    }

    pub fn source(&self) -> &Arc<TrackLocalStaticSample> {
        &self.source
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack").field("id", &self.id()).finish()
    }
}

/// Inbound media track announced by the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    source: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            source: None,
        }
    }

    pub fn from_remote(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            source: Some(track),
        }
    }

    /// RTP source, when the track came from a real connection
    pub fn source(&self) -> Option<&Arc<TrackRemote>> {
        self.source.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Aggregate link state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PlatformEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    LinkState(LinkState),
}

pub type PlatformEventSender = mpsc::UnboundedSender<PlatformEvent>;

/// One negotiated connection object
///
/// `create_offer` / `create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Build a connection to `peer_id`; asynchronous platform events go to `events`
    async fn create(&self, peer_id: &PeerId, events: PlatformEventSender) -> Result<Arc<dyn PeerConnection>>;
}
