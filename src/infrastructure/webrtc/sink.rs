//! Playback sinks
//!
//! Each peer gets exactly one sink; every remote track from that peer is
//! routed into it. The audio output device itself is an external
//! collaborator behind [`AudioOutput`].

use crate::domain::shared::value_objects::PeerId;
use crate::infrastructure::webrtc::connection::RemoteTrack;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub trait PlaybackSink: Send + Sync {
    /// Route one more remote track into this sink
    fn attach(&self, track: RemoteTrack);

    fn track_count(&self) -> usize;

    /// Stop playback and release the device; safe to call more than once
    fn close(&self);
}

pub trait AudioOutput: Send + Sync {
    fn open_sink(&self, peer_id: &PeerId) -> Arc<dyn PlaybackSink>;
}

/// Output that consumes RTP from every attached track and discards it
///
/// Keeps the receive pipeline (jitter buffers, RTCP) running when no audio
/// device is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtpDrainOutput;

impl AudioOutput for RtpDrainOutput {
    fn open_sink(&self, peer_id: &PeerId) -> Arc<dyn PlaybackSink> {
        Arc::new(RtpDrainSink::new(peer_id.clone()))
    }
}

pub struct RtpDrainSink {
    peer_id: PeerId,
    tracks: Mutex<Vec<(String, Option<JoinHandle<()>>)>>,
    packets: Arc<AtomicU64>,
}

impl RtpDrainSink {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            tracks: Mutex::new(Vec::new()),
            packets: Arc::new(AtomicU64::new(0)),
        }
    }

    fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

impl PlaybackSink for RtpDrainSink {
    fn attach(&self, track: RemoteTrack) {
        let reader = track.source().cloned().map(|remote| {
            let packets = self.packets.clone();
            let peer_id = self.peer_id.clone();
            tokio::spawn(async move {
                while let Ok((_packet, _attributes)) = remote.read_rtp().await {
                    packets.fetch_add(1, Ordering::Relaxed);
                }
                debug!("Remote track from {} ended", peer_id);
            })
        });

        info!("Routing track {} into playback sink for {}", track.id, self.peer_id);
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push((track.id, reader));
        }
    }

    fn track_count(&self) -> usize {
        self.tracks.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn close(&self) {
        if let Ok(mut tracks) = self.tracks.lock() {
            if tracks.is_empty() {
                return;
            }
            for (_, reader) in tracks.drain(..) {
                if let Some(reader) = reader {
                    reader.abort();
                }
            }
        }
        info!(
            "Playback sink for {} closed after {} RTP packet(s)",
            self.peer_id,
            self.packets_received()
        );
    }
}

impl Drop for RtpDrainSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_share_one_sink() {
        let output = RtpDrainOutput;
        let sink = output.open_sink(&PeerId::new("bob"));

        sink.attach(RemoteTrack::new("audio-1", "stream"));
        sink.attach(RemoteTrack::new("audio-2", "stream"));
        assert_eq!(sink.track_count(), 2);

        sink.close();
        sink.close();
        assert_eq!(sink.track_count(), 0);
    }
}
