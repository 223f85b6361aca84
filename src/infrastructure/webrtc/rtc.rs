//! webrtc-rs binding for [`PeerConnection`]

use crate::domain::call::{IceCandidate, SdpKind, SessionDescription};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::PeerId;
use crate::infrastructure::webrtc::connection::{
    LinkState, LocalTrack, PeerConnection, PeerConnectionFactory, PlatformEvent, PlatformEventSender, RemoteTrack,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

fn platform_error(context: &str, e: webrtc::Error) -> DomainError {
    DomainError::ConnectionFailed(format!("{}: {}", context, e))
}

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::New,
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
        }
    }
}

/// Builds webrtc-rs connections sharing one media engine setup
pub struct RtcPeerConnectionFactory {
    api: API,
    ice_urls: Vec<String>,
}

impl RtcPeerConnectionFactory {
    pub fn new(ice_urls: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| platform_error("register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| platform_error("register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_urls })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_urls.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    async fn create(&self, peer_id: &PeerId, events: PlatformEventSender) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(|e| platform_error("create peer connection", e))?,
        );

        let candidates = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                if let Ok(init) = candidate.to_json() {
                    let _ = candidates.send(PlatformEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
            })
        }));

        let tracks = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tracks = tracks.clone();
            Box::pin(async move {
                let _ = tracks.send(PlatformEvent::RemoteTrack(RemoteTrack::from_remote(track)));
            })
        }));

        let states = events;
        let peer = peer_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let states = states.clone();
            debug!("Peer connection state for {}: {}", peer, state);
            Box::pin(async move {
                let _ = states.send(PlatformEvent::LinkState(LinkState::from(state)));
            })
        }));

        info!("Created peer connection for {}", peer_id);
        Ok(Arc::new(RtcPeerConnection { inner: pc }))
    }
}

pub struct RtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
}

impl RtcPeerConnection {
    fn to_platform(description: SessionDescription) -> Result<RTCSessionDescription> {
        let result = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        };
        result.map_err(|e| DomainError::Negotiation(format!("invalid session description: {}", e)))
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        let source: Arc<dyn TrackLocal + Send + Sync> = track.source().clone();
        let sender = self
            .inner
            .add_track(source)
            .await
            .map_err(|e| platform_error("add track", e))?;

        // RTCP has to be read for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .inner
            .create_offer(None)
            .await
            .map_err(|e| platform_error("create offer", e))?;
        self.inner
            .set_local_description(offer.clone())
            .await
            .map_err(|e| platform_error("set local offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .inner
            .create_answer(None)
            .await
            .map_err(|e| platform_error("create answer", e))?;
        self.inner
            .set_local_description(answer.clone())
            .await
            .map_err(|e| platform_error("set local answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = Self::to_platform(description)?;
        self.inner
            .set_remote_description(description)
            .await
            .map_err(|e| platform_error("set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.inner
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| platform_error("add candidate", e))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| platform_error("close", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::webrtc::capture::{CaptureDevice, OpusCapture};

    #[test]
    fn test_link_state_from_platform() {
        assert_eq!(LinkState::from(RTCPeerConnectionState::New), LinkState::New);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Connected), LinkState::Connected);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Failed), LinkState::Failed);
    }

    #[tokio::test]
    async fn test_offer_sets_local_description() {
        let factory = RtcPeerConnectionFactory::new(vec![]).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let pc = factory.create(&PeerId::new("bob"), tx).await.unwrap();
        for track in OpusCapture::new("test").acquire().await.unwrap() {
            pc.add_local_track(&track).await.unwrap();
        }
        let offer = pc.create_offer().await.unwrap();

        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        pc.close().await.unwrap();
    }
}
