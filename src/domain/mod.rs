//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: the per-peer call session
//! - Entities: directory participants
//! - Value Objects: ids, languages, negotiation artifacts
//! - Domain Events: session state changes

pub mod call;
pub mod directory;
pub mod relay;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
