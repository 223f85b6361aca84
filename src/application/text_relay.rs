//! Text relay adapter
//!
//! Outbound: fire-and-forget `peer-text` over signaling, whatever the call
//! state. Inbound: each utterance is synthesized in the hear language,
//! played, and prepended to the bounded speaker log. Inbound utterances are
//! handled one at a time in arrival order.

use crate::application::events::{AppEvent, EventBus};
use crate::domain::relay::{RelayedUtterance, SpeakerLog};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{Language, PeerId};
use crate::infrastructure::services::{AudioPlayback, TranslationService};
use crate::infrastructure::signaling::{Recipient, SignalingChannel, SignalingMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

struct Inbound {
    from: PeerId,
    sender_name: String,
    text: String,
    hear: Language,
}

pub struct TextRelay {
    channel: Arc<dyn SignalingChannel>,
    inbound: mpsc::UnboundedSender<Inbound>,
    log: Arc<RwLock<SpeakerLog>>,
}

impl TextRelay {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        translator: Arc<dyn TranslationService>,
        playback: Arc<dyn AudioPlayback>,
        events: EventBus,
        log_capacity: usize,
    ) -> Self {
        let log = Arc::new(RwLock::new(SpeakerLog::new(log_capacity)));
        let (inbound, rx) = mpsc::unbounded_channel();

        tokio::spawn(synthesize_inbound(rx, translator, playback, log.clone(), events));

        Self { channel, inbound, log }
    }

    /// Send `text` to `to`; independent of any call session
    pub async fn relay(&self, to: Recipient, sender_name: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        debug!("Relaying {} chars to {:?}", text.len(), to);
        self.channel
            .send(
                to,
                SignalingMessage::PeerText {
                    text: text.to_string(),
                    name: sender_name.to_string(),
                },
            )
            .await
    }

    /// Hand an inbound utterance to the synthesis worker
    pub fn on_relayed(&self, from: PeerId, sender_name: String, text: String, hear: Language) {
        let inbound = Inbound {
            from,
            sender_name,
            text,
            hear,
        };
        if self.inbound.send(inbound).is_err() {
            warn!("Relay worker stopped, dropping utterance");
        }
    }

    /// Newest first
    pub async fn entries(&self) -> Vec<RelayedUtterance> {
        self.log.read().await.entries().cloned().collect()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.log.read().await.lines()
    }
}

async fn synthesize_inbound(
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    translator: Arc<dyn TranslationService>,
    playback: Arc<dyn AudioPlayback>,
    log: Arc<RwLock<SpeakerLog>>,
    events: EventBus,
) {
    while let Some(inbound) = rx.recv().await {
        let heard = match translator.translate_to_speech(&inbound.text, inbound.hear).await {
            Ok(synthesized) => {
                if !synthesized.audio.is_empty() {
                    if let Err(e) = playback.play(synthesized.audio) {
                        events.error(e);
                    }
                }
                synthesized.text
            }
            Err(e) => {
                // fall back to the untranslated text
                warn!("Synthesis for text from {} failed: {}", inbound.from, e);
                events.error(match e {
                    DomainError::ExternalService(_) => e,
                    other => DomainError::ExternalService(other.to_string()),
                });
                inbound.text.clone()
            }
        };

        let entry = RelayedUtterance::new(inbound.from, inbound.sender_name, inbound.text, heard);
        info!("{}", entry.line());

        let evicted = log.write().await.push(entry.clone());
        if let Some(evicted) = evicted {
            debug!("Speaker log full, evicted entry from {}", evicted.sender_name);
        }
        events.publish(AppEvent::Relayed(entry));
    }
}
