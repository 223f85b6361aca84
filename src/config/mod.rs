//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `BABELCALL__SECTION__KEY` environment variables.

use crate::domain::relay::DEFAULT_LOG_CAPACITY;
use crate::domain::shared::value_objects::Language;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "BABELCALL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub call: CallConfig,
    pub relay: RelayConfig,
    pub language: LanguageConfig,
    pub services: ServicesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name used when joining; the binary asks for one if unset
    pub name: Option<String>,
    /// Fixed participant id; a random one is generated if unset
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/signal".to_string(),
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub urls: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Seconds an outgoing request may stay unanswered; 0 waits forever
    pub request_timeout_secs: u64,
}

impl CallConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub log_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Language the local user speaks (drives recognition)
    pub speak: Language,
    /// Language the local user wants to hear (sent to the services)
    pub hear: Language,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub base_url: String,
    pub translate_path: String,
    pub assistant_path: String,
    pub timeout_secs: u64,
}

impl ServicesConfig {
    pub fn translate_url(&self) -> String {
        join_url(&self.base_url, &self.translate_path)
    }

    pub fn assistant_url(&self) -> String {
        join_url(&self.base_url, &self.assistant_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            translate_path: "/api/translate/text-to-speech".to_string(),
            assistant_path: "/api/llm/ask-with-tts".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter directive; `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl Config {
    /// Defaults, then `path` (if given and present), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml).required(false));
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
