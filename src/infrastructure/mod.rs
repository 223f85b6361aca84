//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The signaling transports (WebSocket, in-memory hub)
//! - The peer connection platform binding and its lifecycle manager
//! - HTTP clients for the translation and assistant services
//! - Metrics recording

pub mod metrics;
pub mod services;
pub mod signaling;
pub mod webrtc;
