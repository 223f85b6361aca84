//! Shared kernel - Common types and utilities used across all bounded contexts

pub mod error;
pub mod events;
pub mod generation;
pub mod value_objects;

pub use error::{DomainError, Result};
pub use events::DomainEvent;
pub use generation::{Generation, GenerationTracker};
pub use value_objects::*;
