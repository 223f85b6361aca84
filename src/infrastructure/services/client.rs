//! HTTP clients for the translate-to-speech and assistant endpoints
//!
//! Both endpoints take `{prompt, hearLang}` and answer with text plus
//! base64 audio. One attempt per request; failures come back as
//! `ExternalService` errors.

use crate::config::ServicesConfig;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::Language;
use crate::infrastructure::metrics;
use crate::infrastructure::services::speech::Synthesized;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate `text` into `hear` and synthesize it
    async fn translate_to_speech(&self, text: &str, hear: Language) -> Result<Synthesized>;
}

#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Ask the language model and synthesize its reply in `hear`
    async fn ask(&self, prompt: &str, hear: Language) -> Result<Synthesized>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest<'a> {
    prompt: &'a str,
    hear_lang: Language,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
    #[serde(default)]
    audio_content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssistantResponse {
    text: String,
    #[serde(default)]
    audio_content: String,
}

fn decode_audio(encoded: &str) -> Result<Bytes> {
    if encoded.is_empty() {
        return Ok(Bytes::new());
    }
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| DomainError::ExternalService(format!("invalid audio content: {}", e)))
}

#[derive(Clone)]
pub struct HttpSpeechServices {
    client: reqwest::Client,
    translate_url: String,
    assistant_url: String,
}

impl HttpSpeechServices {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DomainError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            translate_url: config.translate_url(),
            assistant_url: config.assistant_url(),
        })
    }

    async fn post<T>(&self, service: &'static str, url: &str, prompt: &str, hear: Language) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let started = Instant::now();
        let result = self.send(url, prompt, hear).await;
        metrics::record_service_request(service, result.is_ok(), started.elapsed());

        if let Err(e) = &result {
            warn!("{} request failed: {}", service, e);
        }
        result
    }

    async fn send<T>(&self, url: &str, prompt: &str, hear: Language) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!("POST {} ({} chars, hearLang={})", url, prompt.len(), hear);

        let response = self
            .client
            .post(url)
            .json(&SpeechRequest {
                prompt,
                hear_lang: hear,
            })
            .send()
            .await
            .map_err(|e| DomainError::ExternalService(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::ExternalService(format!("{} returned {}: {}", url, status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DomainError::ExternalService(format!("invalid response: {}", e)))
    }
}

#[async_trait]
impl TranslationService for HttpSpeechServices {
    async fn translate_to_speech(&self, text: &str, hear: Language) -> Result<Synthesized> {
        let response: TranslateResponse = self.post("translate", &self.translate_url, text, hear).await?;
        Ok(Synthesized {
            audio: decode_audio(&response.audio_content)?,
            text: response.translated_text,
        })
    }
}

#[async_trait]
impl AssistantService for HttpSpeechServices {
    async fn ask(&self, prompt: &str, hear: Language) -> Result<Synthesized> {
        let response: AssistantResponse = self.post("assistant", &self.assistant_url, prompt, hear).await?;
        Ok(Synthesized {
            audio: decode_audio(&response.audio_content)?,
            text: response.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(SpeechRequest {
            prompt: "hello",
            hear_lang: Language::Ja,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"prompt": "hello", "hearLang": "ja"}));
    }

    #[test]
    fn test_translate_response_parsing() {
        let response: TranslateResponse =
            serde_json::from_str(r#"{"translatedText":"こんにちは","audioContent":"UklGRg=="}"#).unwrap();
        assert_eq!(response.translated_text, "こんにちは");
        assert_eq!(decode_audio(&response.audio_content).unwrap(), Bytes::from_static(b"RIFF"));
    }

    #[test]
    fn test_invalid_audio_is_external_error() {
        assert!(matches!(decode_audio("not base64!"), Err(DomainError::ExternalService(_))));
        assert!(decode_audio("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_external_error() {
        let config = ServicesConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..ServicesConfig::default()
        };
        let services = HttpSpeechServices::new(&config).unwrap();

        let result = services.ask("hi", Language::En).await;
        assert!(matches!(result, Err(DomainError::ExternalService(_))));
    }
}
