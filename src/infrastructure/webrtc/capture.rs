//! Local audio capture
//!
//! Capture is acquired once per process and its tracks are attached to
//! every connection created afterwards. Whatever produces the samples (a
//! microphone driver, a file, a synthesizer) writes into
//! [`LocalTrack::source`].

use crate::domain::shared::error::{DomainError, Result};
use crate::infrastructure::webrtc::connection::LocalTrack;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>>;
}

/// Single Opus track fed by an external sample producer
#[derive(Debug, Clone)]
pub struct OpusCapture {
    stream_id: String,
}

impl OpusCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl CaptureDevice for OpusCapture {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ));

        info!("Acquired local audio track for stream {}", self.stream_id);
        Ok(vec![LocalTrack::new(track)])
    }
}

/// Platform without a usable microphone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

#[async_trait]
impl CaptureDevice for NoCapture {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        Err(DomainError::CapabilityUnavailable(
            "microphone permission denied".to_string(),
        ))
    }
}
