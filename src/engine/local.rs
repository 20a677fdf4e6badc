//! Offline engine backed by the host's speech device.

use super::{validate_common, Engine, EngineCapabilities, EngineDescriptor, SynthesisOutcome};
use crate::config::LocalConfig;
use crate::engine::LOCAL_ENGINE_ID;
use crate::types::{OptionsValidation, SynthesisRequest, VoiceInfo};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One utterance handed to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    /// Device voice id; `None` lets the device pick its default for `lang`.
    pub voice: Option<String>,
    pub pitch: f32,
    pub rate: f32,
    /// 0.0..=1.0
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVoice {
    pub id: String,
    pub name: String,
    pub lang: String,
}

/// Speech synthesizer owned by the runtime (OS TTS, embedded synthesizer, ...).
#[async_trait]
pub trait SpeechDevice: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn voices(&self) -> Vec<DeviceVoice>;

    /// Resolves when the utterance ends, or with the device's error.
    async fn speak(&self, utterance: Utterance) -> Result<()>;

    /// Silence the current utterance, if any.
    async fn cancel(&self);
}

/// Device for runtimes without speech synthesis. Every utterance fails as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSpeechDevice;

#[async_trait]
impl SpeechDevice for NullSpeechDevice {
    fn is_supported(&self) -> bool {
        false
    }

    async fn voices(&self) -> Vec<DeviceVoice> {
        Vec::new()
    }

    async fn speak(&self, _utterance: Utterance) -> Result<()> {
        Err(Error::unsupported("speech synthesis is not available on this runtime"))
    }

    async fn cancel(&self) {}
}

/// No network, no streaming; the terminal link of the default fallback chain.
///
/// Voice ids the device does not know are not an error: the device default for the
/// request language is used instead.
pub struct LocalEngine {
    descriptor: EngineDescriptor,
    config: LocalConfig,
    device: Arc<dyn SpeechDevice>,
    cancel: Mutex<CancellationToken>,
    initialized: AtomicBool,
}

impl LocalEngine {
    pub fn new(config: LocalConfig, device: Arc<dyn SpeechDevice>) -> Self {
        let descriptor = EngineDescriptor::new(
            LOCAL_ENGINE_ID,
            "System speech",
            EngineCapabilities {
                streaming: false,
                max_text_length: Some(config.max_text_length),
                languages: Vec::new(),
            },
        );
        Self {
            descriptor,
            config,
            device,
            cancel: Mutex::new(CancellationToken::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Cancel whatever is speaking and hand out a fresh token for the next utterance.
    fn renew_token(&self) -> CancellationToken {
        let mut slot = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
        slot.cancel();
        *slot = CancellationToken::new();
        slot.clone()
    }

    async fn pick_voice(&self, request: &SynthesisRequest) -> Option<String> {
        let voices = self.device.voices().await;
        if voices.iter().any(|v| v.id == request.voice) {
            return Some(request.voice.clone());
        }
        let primary = request
            .language
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        voices
            .into_iter()
            .find(|v| v.lang.to_ascii_lowercase().starts_with(&primary))
            .map(|v| v.id)
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn initialize(&self) -> Result<()> {
        if !self.device.is_supported() {
            return Err(Error::configuration_with_context(
                "speech synthesis is not supported on this runtime",
                ErrorContext::new().with_engine(LOCAL_ENGINE_ID),
            ));
        }
        if !self.initialized.swap(true, Ordering::SeqCst) {
            debug!(engine = LOCAL_ENGINE_ID, "local engine initialized");
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome> {
        let token = self.renew_token();
        self.device.cancel().await;

        if !self.device.is_supported() {
            return Err(Error::unsupported(
                "speech synthesis is not supported on this runtime",
            ));
        }

        let utterance = Utterance {
            text: request.text.clone(),
            lang: request.language.clone(),
            voice: self.pick_voice(request).await,
            pitch: self.config.pitch,
            rate: request.speed,
            volume: request.volume_fraction(),
        };

        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            res = self.device.speak(utterance) => res,
        }?;

        info!(
            engine = LOCAL_ENGINE_ID,
            request_id = %request.request_id,
            "local synthesis finished"
        );
        Ok(SynthesisOutcome {
            engine_id: LOCAL_ENGINE_ID.to_string(),
            playback: None,
        })
    }

    async fn available_voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self
            .device
            .voices()
            .await
            .into_iter()
            .map(|v| VoiceInfo::new(v.id, v.name, v.lang, LOCAL_ENGINE_ID))
            .collect())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
        self.device.cancel().await;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.device.is_supported()
    }

    fn validate_options(&self, request: &SynthesisRequest) -> OptionsValidation {
        validate_common(&self.descriptor.capabilities, request)
    }
}
