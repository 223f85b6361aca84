//! Interface layer - Front ends driving the orchestrator
//!
//! This layer handles:
//! - Parsing console input into commands
//! - Rendering application events as text

pub mod console;
