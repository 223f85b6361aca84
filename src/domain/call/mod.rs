//! Call bounded context - per-peer session lifecycle

pub mod aggregate;
pub mod event;
pub mod incoming;
pub mod value_object;

pub use aggregate::{CallSession, CandidateDisposition};
pub use event::SessionEvent;
pub use incoming::{Enqueued, IncomingCallQueue, IncomingCallRequest};
pub use value_object::{CallRole, CallState, EndReason, IceCandidate, SdpKind, SessionDescription};
