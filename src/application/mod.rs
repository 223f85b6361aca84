//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Driving every call session from one actor
//! - Relaying text between participants
//! - The voice assistant
//! - Publishing events to the front end

pub mod assistant;
pub mod events;
pub mod orchestrator;
pub mod text_relay;

pub use assistant::Assistant;
pub use events::{AppEvent, EventBus};
pub use orchestrator::{
    Collaborators, Command, Orchestrator, OrchestratorHandle, OrchestratorSettings, SessionView, Snapshot, BUSY_REASON,
};
pub use text_relay::TextRelay;
