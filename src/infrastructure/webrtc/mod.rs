//! Media connections: the platform seam, its webrtc-rs binding and the
//! manager that owns every live connection.

pub mod capture;
pub mod connection;
pub mod manager;
pub mod rtc;
pub mod sink;

pub use capture::{CaptureDevice, NoCapture, OpusCapture};
pub use connection::{
    LinkState, LocalTrack, PeerConnection, PeerConnectionFactory, PlatformEvent, PlatformEventSender, RemoteTrack,
};
pub use manager::{ConnectionEvent, ConnectionHandle, ConnectionManager, NegotiationPhase};
pub use rtc::{RtcPeerConnectionFactory, RtcPeerConnection};
pub use sink::{AudioOutput, PlaybackSink, RtpDrainOutput, RtpDrainSink};
