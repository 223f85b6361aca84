//! External speech and language services

pub mod client;
pub mod inflight;
pub mod speech;

pub use client::{AssistantService, HttpSpeechServices, TranslationService};
pub use inflight::{ActionSlot, Claim};
pub use speech::{AudioPlayback, LoggingPlayback, NoRecognizer, ScriptedRecognizer, SpeechRecognizer, Synthesized};
