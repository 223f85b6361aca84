//! Text relay bounded context - utterances received from peers

pub mod speaker_log;

pub use speaker_log::{RelayedUtterance, SpeakerLog, DEFAULT_LOG_CAPACITY};
