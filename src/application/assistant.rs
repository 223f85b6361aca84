//! Voice assistant use case
//!
//! One question at a time: asking again aborts the pending request and a
//! late answer to the old one is discarded.

use crate::application::events::{AppEvent, EventBus};
use crate::domain::shared::value_objects::Language;
use crate::infrastructure::services::{ActionSlot, AssistantService, AudioPlayback};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct Assistant {
    service: Arc<dyn AssistantService>,
    playback: Arc<dyn AudioPlayback>,
    slot: Arc<ActionSlot>,
    events: EventBus,
}

impl Assistant {
    pub fn new(service: Arc<dyn AssistantService>, playback: Arc<dyn AudioPlayback>, events: EventBus) -> Self {
        Self {
            service,
            playback,
            slot: Arc::new(ActionSlot::new("assistant")),
            events,
        }
    }

    /// Ask `prompt`; the reply arrives as [`AppEvent::AssistantReply`]
    pub fn ask(&self, prompt: String, hear: Language) -> Option<JoinHandle<()>> {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return None;
        }

        let service = self.service.clone();
        let playback = self.playback.clone();
        let slot = self.slot.clone();
        let events = self.events.clone();

        let question = prompt.clone();
        let claim = self.slot.start(async move { service.ask(&question, hear).await })?;

        Some(tokio::spawn(async move {
            let outcome = slot.settle(claim).await;

            match outcome {
                None => debug!("Assistant request superseded"),
                Some(Ok(reply)) => {
                    info!("Assistant replied ({} chars)", reply.text.len());
                    if !reply.audio.is_empty() {
                        if let Err(e) = playback.play(reply.audio) {
                            events.error(e);
                        }
                    }
                    events.publish(AppEvent::AssistantReply {
                        prompt,
                        text: reply.text,
                    });
                }
                Some(Err(e)) => events.error(e),
            }
        }))
    }

    /// Abort the pending request, if any
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::error::{DomainError, Result};
    use crate::infrastructure::services::{AudioPlayback, Synthesized};
    use async_trait::async_trait;
    use bytes::Bytes;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Service {}

        #[async_trait]
        impl AssistantService for Service {
            async fn ask(&self, prompt: &str, hear: Language) -> Result<Synthesized>;
        }
    }

    mock! {
        Playback {}

        impl AudioPlayback for Playback {
            fn play(&self, audio: Bytes) -> Result<()>;
        }
    }

    struct Slow;

    #[async_trait]
    impl AssistantService for Slow {
        async fn ask(&self, prompt: &str, _hear: Language) -> Result<Synthesized> {
            if prompt == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(Synthesized {
                text: format!("re: {}", prompt),
                audio: Bytes::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_reply_is_played_and_published() {
        let mut service = MockService::new();
        service
            .expect_ask()
            .withf(|prompt, hear| prompt == "what time is it" && *hear == Language::Ja)
            .times(1)
            .returning(|_, _| {
                Ok(Synthesized {
                    text: "三時です".to_string(),
                    audio: Bytes::from_static(b"wav"),
                })
            });

        let mut playback = MockPlayback::new();
        playback.expect_play().times(1).returning(|_| Ok(()));

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let assistant = Assistant::new(Arc::new(service), Arc::new(playback), events);

        assistant
            .ask("what time is it".into(), Language::Ja)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::AssistantReply {
                prompt: "what time is it".into(),
                text: "三時です".into()
            }
        );
    }

    #[tokio::test]
    async fn test_service_failure_becomes_error_event() {
        let mut service = MockService::new();
        service
            .expect_ask()
            .returning(|_, _| Err(DomainError::ExternalService("503".into())));
        let mut playback = MockPlayback::new();
        playback.expect_play().never();

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let assistant = Assistant::new(Arc::new(service), Arc::new(playback), events);

        assistant.ask("hi".into(), Language::En).unwrap().await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            AppEvent::Error(DomainError::ExternalService(_))
        ));
    }

    #[tokio::test]
    async fn test_second_question_supersedes_first() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut playback = MockPlayback::new();
        playback.expect_play().never();
        let assistant = Assistant::new(Arc::new(Slow), Arc::new(playback), events);

        let first = assistant.ask("slow".into(), Language::En).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = assistant.ask("fast".into(), Language::En).unwrap();

        second.await.unwrap();
        first.await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::AssistantReply {
                prompt: "fast".into(),
                text: "re: fast".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_back_to_back_questions_keep_only_the_last() {
        for _ in 0..50 {
            let events = EventBus::default();
            let mut rx = events.subscribe();
            let mut playback = MockPlayback::new();
            playback.expect_play().never();
            let assistant = Assistant::new(Arc::new(Slow), Arc::new(playback), events);

            let first = assistant.ask("slow".into(), Language::En).unwrap();
            let second = assistant.ask("fast".into(), Language::En).unwrap();

            second.await.unwrap();
            first.await.unwrap();

            assert_eq!(
                rx.recv().await.unwrap(),
                AppEvent::AssistantReply {
                    prompt: "fast".into(),
                    text: "re: fast".into()
                }
            );
            assert!(rx.try_recv().is_err());
            assert!(!assistant.is_pending());
        }
    }

    #[tokio::test]
    async fn test_cancel_drops_the_pending_question() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let assistant = Assistant::new(Arc::new(Slow), Arc::new(MockPlayback::new()), events);

        let pending = assistant.ask("slow".into(), Language::En).unwrap();
        assert!(assistant.is_pending());

        assistant.cancel();
        pending.await.unwrap();

        assert!(!assistant.is_pending());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_blank_prompt_is_ignored() {
        let events = EventBus::default();
        let assistant = Assistant::new(Arc::new(Slow), Arc::new(MockPlayback::new()), events);
        assert!(assistant.ask("   ".into(), Language::En).is_none());
    }
}
