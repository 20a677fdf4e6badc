use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied overrides. Anything left `None` is filled from the config store,
/// then from [`crate::config::SynthesisDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub voice: Option<String>,
    pub language: Option<String>,
    pub speed: Option<f32>,
    pub volume: Option<u8>,
    pub stream: Option<bool>,
}

impl SynthesisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn volume(mut self, volume: u8) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

/// One fully-resolved synthesis attempt.
///
/// A request is never mutated once issued; retries and fallbacks derive a new value
/// through [`SynthesisRequest::next_attempt`] and [`SynthesisRequest::reissue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Correlation id shared by every attempt derived from the same caller request.
    pub request_id: String,
    pub text: String,
    pub voice: String,
    pub language: String,
    pub speed: f32,
    /// 0..=100
    pub volume: u8,
    pub stream: bool,
    pub retry_count: u32,
}

impl SynthesisRequest {
    pub fn new(
        text: impl Into<String>,
        voice: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            text: text.into(),
            voice: voice.into(),
            language: language.into(),
            speed: 1.0,
            volume: 80,
            stream: false,
            retry_count: 0,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Same request, one more retry on the same engine.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Same request for a different engine, with the retry budget restored.
    pub fn reissue(&self) -> Self {
        Self {
            retry_count: 0,
            ..self.clone()
        }
    }

    /// Volume scaled to the 0.0..=1.0 range used by playback devices.
    pub fn volume_fraction(&self) -> f32 {
        f32::from(self.volume.min(100)) / 100.0
    }
}

/// Result of [`crate::engine::Engine::validate_options`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsValidation {
    pub errors: Vec<String>,
}

impl OptionsValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> crate::Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(crate::Error::InvalidOptions {
                errors: self.errors,
            })
        }
    }
}
