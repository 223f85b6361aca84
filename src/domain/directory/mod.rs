//! Directory bounded context - who is reachable right now

pub mod client;
pub mod entity;

pub use client::{DirectoryClient, RosterUpdate};
pub use entity::Participant;
