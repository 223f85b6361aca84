//! Babelcall - peer-to-peer voice calls with translated text relay
//!
//! Participants find each other through a directory on the signaling
//! server, call each other over WebRTC and exchange text that is
//! translated and spoken in each listener's language.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::{DomainError, Result};
