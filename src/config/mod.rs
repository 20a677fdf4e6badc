//! 运行时配置：YAML 文件 + 环境变量覆盖；用户偏好由 [`ConfigStore`] 持久化。
//!
//! Runtime configuration.
//!
//! Two layers are kept apart:
//!
//! - [`RelayConfig`] is deployment configuration (endpoints, timeouts, queue bounds,
//!   retry policy). It is loaded once from YAML and may be overridden by environment
//!   variables.
//! - [`ConfigStore`] holds user preferences (engine choice, voice, credential, ...)
//!   that the orchestrator reads as request defaults and writes back on engine switches.
//!
//! ## Environment overrides
//!
//! | Variable                      | Field                   |
//! |-------------------------------|-------------------------|
//! | `TTS_RELAY_ENDPOINT`          | `remote.endpoint`       |
//! | `TTS_RELAY_MODEL`             | `remote.model`          |
//! | `TTS_RELAY_HTTP_TIMEOUT_SECS` | `remote.timeout_secs`   |
//! | `TTS_RELAY_PROXY_URL`         | `remote.proxy_url`      |

mod store;

pub use store::{ConfigKey, ConfigStore, JsonFileConfigStore, MemoryConfigStore};

use crate::engine::{LOCAL_ENGINE_ID, REMOTE_ENGINE_ID};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation";
pub const DEFAULT_MODEL: &str = "qwen-tts";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub playback: PlaybackConfig,
    pub fallback: FallbackConfig,
    pub defaults: SynthesisDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub proxy_url: Option<String>,
    /// Voice ids the remote service accepts; requests naming anything else are rejected up front.
    pub voices: Vec<String>,
    pub max_text_length: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
            proxy_url: None,
            voices: ["Cherry", "Serena", "Ethan", "Chelsie", "Dylan", "Jada", "Sunny"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_text_length: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub max_text_length: usize,
    pub pitch: f32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_text_length: 4000,
            pitch: 1.0,
        }
    }
}

/// Bounds and timers of the streaming playback queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub capacity: usize,
    pub buffer_threshold: usize,
    pub chunk_timeout_ms: u64,
    pub chunk_ttl_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            buffer_threshold: 5,
            chunk_timeout_ms: 5_000,
            chunk_ttl_ms: 30_000,
        }
    }
}

impl PlaybackConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn chunk_ttl(&self) -> Duration {
        Duration::from_millis(self.chunk_ttl_ms)
    }

    /// Threshold never exceeds capacity, otherwise buffering could never finish.
    pub fn effective_threshold(&self) -> usize {
        self.buffer_threshold.clamp(1, self.capacity.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Engine ids in fallback order; the last one is terminal.
    pub chain: Vec<String>,
    pub max_audio_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            chain: vec![REMOTE_ENGINE_ID.to_string(), LOCAL_ENGINE_ID.to_string()],
            max_audio_retries: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl FallbackConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Request defaults used when neither the caller nor the config store provides a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisDefaults {
    pub engine: String,
    pub voice: String,
    pub language: String,
    pub speed: f32,
    pub volume: u8,
    pub streaming: bool,
    pub fallback_enabled: bool,
}

impl Default for SynthesisDefaults {
    fn default() -> Self {
        Self {
            engine: REMOTE_ENGINE_ID.to_string(),
            voice: "Cherry".to_string(),
            language: "zh-CN".to_string(),
            speed: 1.0,
            volume: 80,
            streaming: false,
            fallback_enabled: true,
        }
    }
}

impl RelayConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: RelayConfig = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Apply `TTS_RELAY_*` overrides on top of the loaded values.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = env::var("TTS_RELAY_ENDPOINT") {
            self.remote.endpoint = endpoint;
        }
        if let Ok(model) = env::var("TTS_RELAY_MODEL") {
            self.remote.model = model;
        }
        if let Some(secs) = env::var("TTS_RELAY_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.remote.timeout_secs = secs;
        }
        if let Ok(proxy) = env::var("TTS_RELAY_PROXY_URL") {
            self.remote.proxy_url = Some(proxy);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.playback.capacity == 0 {
            return Err(invalid("playback.capacity", "must be at least 1"));
        }
        if self.fallback.chain.is_empty() {
            return Err(invalid("fallback.chain", "must name at least one engine"));
        }
        if !(0.5..=2.0).contains(&self.defaults.speed) {
            return Err(invalid("defaults.speed", "must be within 0.5..=2.0"));
        }
        if self.defaults.volume > 100 {
            return Err(invalid("defaults.volume", "must be within 0..=100"));
        }
        Ok(())
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("relay_config"),
    )
}
