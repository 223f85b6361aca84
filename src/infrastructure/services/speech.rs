//! Speech collaborators
//!
//! Recognition and playback are platform capabilities. The traits are the
//! seam; the implementations here cover platforms that lack them.

use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::Language;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// Audio synthesized by an external service, with the text it speaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesized {
    pub text: String,
    pub audio: Bytes,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen for one utterance in `language`
    async fn recognize(&self, language: Language) -> Result<String>;
}

pub trait AudioPlayback: Send + Sync {
    fn play(&self, audio: Bytes) -> Result<()>;
}

/// Platform without speech recognition
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecognizer;

#[async_trait]
impl SpeechRecognizer for NoRecognizer {
    async fn recognize(&self, _language: Language) -> Result<String> {
        Err(DomainError::CapabilityUnavailable(
            "speech recognition is not supported on this platform".to_string(),
        ))
    }
}

/// Recognizer fed with text from elsewhere, one utterance per line
///
/// Used by the console front end, where typing stands in for speaking.
pub struct ScriptedRecognizer {
    lines: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,
}

impl ScriptedRecognizer {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedSender<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                lines: tokio::sync::Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn recognize(&self, language: Language) -> Result<String> {
        debug!("Listening for one utterance ({})", language.recognition_locale());
        self.lines
            .lock()
            .await
            .recv()
            .await
            .map(|line| line.trim().to_string())
            .ok_or_else(|| DomainError::CapabilityUnavailable("recognition input closed".to_string()))
    }
}

/// Playback that only reports what it would play
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlayback;

impl AudioPlayback for LoggingPlayback {
    fn play(&self, audio: Bytes) -> Result<()> {
        info!("Playing {} bytes of synthesized audio", audio.len());
        Ok(())
    }
}
