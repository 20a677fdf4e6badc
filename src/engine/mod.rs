//! 引擎能力契约：所有合成后端实现的统一接口。
//!
//! Engine capability contract.
//!
//! Every backend implements [`Engine`]. Capabilities that differ between backends
//! (streaming, text length limits, languages) are plain data on the
//! [`EngineDescriptor`], never optional methods.
//!
//! | Engine | Id | Network | Streaming |
//! |--------|----|---------|-----------|
//! | [`RemoteEngine`] | `remote` | yes | yes |
//! | [`LocalEngine`] | `local` | no | no |

mod local;
mod remote;

pub use local::{DeviceVoice, LocalEngine, NullSpeechDevice, SpeechDevice, Utterance};
pub use remote::RemoteEngine;

use crate::playback::PlaybackReport;
use crate::types::{OptionsValidation, SynthesisRequest, VoiceInfo};
use crate::Result;
use async_trait::async_trait;

pub const REMOTE_ENGINE_ID: &str = "remote";
pub const LOCAL_ENGINE_ID: &str = "local";

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;
pub const MAX_VOLUME: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineCapabilities {
    pub streaming: bool,
    pub max_text_length: Option<usize>,
    /// Language prefixes (`"zh"`, `"en"`). Empty means any language.
    pub languages: Vec<String>,
}

impl EngineCapabilities {
    pub fn supports_language(&self, language: &str) -> bool {
        if self.languages.is_empty() {
            return true;
        }
        let primary = language
            .split(['-', '_'])
            .next()
            .unwrap_or(language)
            .to_ascii_lowercase();
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(&primary))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub id: String,
    pub display_name: String,
    pub capabilities: EngineCapabilities,
}

impl EngineDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: EngineCapabilities,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities,
        }
    }
}

/// How a synthesis call completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutcome {
    pub engine_id: String,
    /// Present when audio went through the streaming playback queue.
    pub playback: Option<PlaybackReport>,
}

/// Contract implemented by every synthesis backend.
///
/// Engines are long-lived: they are registered once with the orchestrator and only
/// ever re-initialized, never rebuilt.
#[async_trait]
pub trait Engine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Idempotent setup. Fails with [`crate::Error::Configuration`] when a required
    /// credential or runtime capability is missing.
    async fn initialize(&self) -> Result<()>;

    /// Speak `request`, resolving once the audio has finished playing.
    ///
    /// Any playback still running from a previous call is stopped first.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome>;

    async fn available_voices(&self) -> Result<Vec<VoiceInfo>>;

    /// Idempotent; a no-op when nothing is playing.
    async fn stop(&self) -> Result<()>;

    /// Cheap synchronous readiness check.
    fn is_available(&self) -> bool;

    /// Reject a request before any network or device work happens.
    fn validate_options(&self, request: &SynthesisRequest) -> OptionsValidation;
}

/// Checks shared by every engine: text, speed, volume, language, length.
pub(crate) fn validate_common(
    caps: &EngineCapabilities,
    request: &SynthesisRequest,
) -> OptionsValidation {
    let mut v = OptionsValidation::new();
    if request.text.trim().is_empty() {
        v.reject("text must not be empty");
    }
    if let Some(max) = caps.max_text_length {
        let len = request.text.chars().count();
        if len > max {
            v.reject(format!("text is {} characters, limit is {}", len, max));
        }
    }
    if !request.speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&request.speed) {
        v.reject(format!(
            "speed {} outside {}..={}",
            request.speed, MIN_SPEED, MAX_SPEED
        ));
    }
    if request.volume > MAX_VOLUME {
        v.reject(format!("volume {} outside 0..={}", request.volume, MAX_VOLUME));
    }
    if !caps.supports_language(&request.language) {
        v.reject(format!("language '{}' is not supported", request.language));
    }
    v
}
