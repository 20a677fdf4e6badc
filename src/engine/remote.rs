//! DashScope (qwen-tts) cloud engine.

use super::{validate_common, Engine, EngineCapabilities, EngineDescriptor, SynthesisOutcome};
use crate::config::{ConfigKey, ConfigStore, RemoteConfig};
use crate::engine::REMOTE_ENGINE_ID;
use crate::playback::{ChunkPayload, StreamingPlaybackQueue};
use crate::transport::{decode_sse, HttpTransport, TransportError};
use crate::types::{OptionsValidation, SynthesisRequest, VoiceInfo};
use crate::{Error, ErrorClass, ErrorContext, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ERROR_BODY_LIMIT: usize = 200;

/// Cloud engine speaking the DashScope multimodal-generation protocol.
///
/// The credential is read from the [`ConfigStore`] on every call, so clearing it there
/// takes effect immediately. All audio, streamed or not, is played through the shared
/// [`StreamingPlaybackQueue`]. [`Engine::stop`] abandons the request at any stage: while
/// waiting for the response, while reading its body, or during playback.
pub struct RemoteEngine {
    descriptor: EngineDescriptor,
    config: RemoteConfig,
    transport: HttpTransport,
    store: Arc<dyn ConfigStore>,
    queue: Arc<StreamingPlaybackQueue>,
    cancel: Mutex<CancellationToken>,
    initialized: AtomicBool,
}

impl RemoteEngine {
    pub fn new(
        config: RemoteConfig,
        store: Arc<dyn ConfigStore>,
        queue: Arc<StreamingPlaybackQueue>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        let descriptor = EngineDescriptor::new(
            REMOTE_ENGINE_ID,
            "DashScope Qwen TTS",
            EngineCapabilities {
                streaming: true,
                max_text_length: Some(config.max_text_length),
                languages: Vec::new(),
            },
        );
        Ok(Self {
            descriptor,
            config,
            transport,
            store,
            queue,
            cancel: Mutex::new(CancellationToken::new()),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn queue(&self) -> &Arc<StreamingPlaybackQueue> {
        &self.queue
    }

    /// Cancel the previous request, if any, and hand out a token for the next one.
    fn renew_token(&self) -> CancellationToken {
        let mut slot = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
        slot.cancel();
        *slot = CancellationToken::new();
        slot.clone()
    }

    fn credential(&self) -> Option<String> {
        self.store
            .get(ConfigKey::Credential)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    fn missing_credential() -> Error {
        Error::configuration_with_context(
            "remote engine has no credential configured",
            ErrorContext::new()
                .with_field_path(ConfigKey::Credential.as_str())
                .with_engine(REMOTE_ENGINE_ID),
        )
    }

    fn request_body(&self, request: &SynthesisRequest) -> Value {
        json!({
            "model": self.config.model,
            "input": {
                "text": request.text,
                "voice": request.voice,
                "language_type": language_type(&request.language),
            }
        })
    }
}

#[async_trait]
impl Engine for RemoteEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn initialize(&self) -> Result<()> {
        if self.credential().is_none() {
            return Err(Self::missing_credential());
        }
        if !self.initialized.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.config.endpoint, model = %self.config.model, "remote engine initialized");
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome> {
        let token = self.renew_token();
        self.queue.stop().await;

        let credential = self.credential().ok_or_else(Self::missing_credential)?;
        let started = Instant::now();
        let body = self.request_body(request);

        let resp = until_cancelled(
            &token,
            self.transport.post_json(
                &self.config.endpoint,
                &credential,
                &body,
                request.stream,
                &request.request_id,
            ),
        )
        .await??;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let raw = until_cancelled(&token, resp.text())
                .await?
                .unwrap_or_default();
            let message = error_message(&raw, status);
            warn!(
                engine = REMOTE_ENGINE_ID,
                request_id = %request.request_id,
                status,
                "remote synthesis rejected"
            );
            return Err(Error::Remote {
                status,
                message,
                retryable: ErrorClass::is_transient_status(status),
            });
        }

        let is_event_stream = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        let volume = request.volume_fraction();
        let played = if request.stream && is_event_stream {
            let frames = decode_sse(HttpTransport::body_stream(resp));
            let chunks = frames.filter_map(move |frame| async move {
                match frame {
                    Ok(value) => frame_audio(&value, status).transpose(),
                    Err(e) => Some(Err(e)),
                }
            });
            until_cancelled(&token, self.queue.process_streaming_audio(chunks, volume)).await
        } else {
            let value = until_cancelled(&token, resp.json::<Value>())
                .await?
                .map_err(|e| Error::Transport(TransportError::Http(e)))?;
            let payload = response_audio(&value, status)?;
            until_cancelled(
                &token,
                self.queue
                    .process_streaming_audio(stream::iter([Ok(payload)]), volume),
            )
            .await
        };
        let report = match played {
            Ok(report) => report?,
            Err(cancelled) => {
                // The abandoned playback may have left chunks behind.
                self.queue.stop().await;
                return Err(cancelled);
            }
        };

        info!(
            engine = REMOTE_ENGINE_ID,
            request_id = %request.request_id,
            chunks = report.played,
            duration_ms = started.elapsed().as_millis() as u64,
            "remote synthesis finished"
        );
        Ok(SynthesisOutcome {
            engine_id: REMOTE_ENGINE_ID.to_string(),
            playback: Some(report),
        })
    }

    async fn available_voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self
            .config
            .voices
            .iter()
            .map(|id| {
                VoiceInfo::new(
                    id.clone(),
                    id.clone(),
                    format!("{} voice", self.config.model),
                    REMOTE_ENGINE_ID,
                )
            })
            .collect())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
        self.queue.stop().await;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.credential().is_some()
    }

    fn validate_options(&self, request: &SynthesisRequest) -> OptionsValidation {
        let mut v = validate_common(&self.descriptor.capabilities, request);
        if !self.config.voices.iter().any(|voice| voice == &request.voice) {
            v.reject(format!("voice '{}' is not offered by the remote engine", request.voice));
        }
        v
    }
}

/// Run `fut` unless `token` fires first.
async fn until_cancelled<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

/// DashScope `language_type` for a BCP-47-ish tag.
pub(crate) fn language_type(language: &str) -> &'static str {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match primary.as_str() {
        "zh" => "Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        _ => "Auto",
    }
}

/// Audio carried by a non-streaming response: `output.audio_url` first, then `output.audio`.
fn response_audio(value: &Value, status: u16) -> Result<ChunkPayload> {
    if let Some(err) = service_error(value, status) {
        return Err(err);
    }
    let output = value.get("output");
    if let Some(Value::String(url)) = output.and_then(|o| o.get("audio_url")) {
        if !url.is_empty() {
            return Ok(ChunkPayload::Url(url.clone()));
        }
    }
    match output.and_then(|o| o.get("audio")) {
        Some(audio) => ChunkPayload::from_json(audio),
        None => Err(Error::Remote {
            status,
            message: "synthesis response carried no audio output".to_string(),
            retryable: false,
        }),
    }
}

/// Audio carried by one SSE frame. Frames without inline data (progress frames and the
/// closing frame that links the whole clip) yield nothing.
fn frame_audio(value: &Value, status: u16) -> Result<Option<ChunkPayload>> {
    if let Some(err) = service_error(value, status) {
        return Err(err);
    }
    match value.pointer("/output/audio/data") {
        Some(Value::String(data)) if !data.is_empty() => Ok(Some(ChunkPayload::Base64(data.clone()))),
        _ => Ok(None),
    }
}

/// A `{code, message}` body without `output` is a service-side failure even on 2xx.
fn service_error(value: &Value, status: u16) -> Option<Error> {
    if value.get("output").is_some() {
        return None;
    }
    let code = value.get("code").and_then(Value::as_str)?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(Error::Remote {
        status,
        message: format!("{}: {}", code, message),
        retryable: false,
    })
}

fn error_message(raw: &str, status: u16) -> String {
    let parsed: Option<Value> = serde_json::from_str(raw).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.get("message")
            .or_else(|| v.pointer("/error/message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if raw.trim().is_empty() => format!("HTTP {}", status),
        None => raw.trim().chars().take(ERROR_BODY_LIMIT).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_type_mapping() {
        assert_eq!(language_type("zh-CN"), "Chinese");
        assert_eq!(language_type("en_US"), "English");
        assert_eq!(language_type("ja"), "Japanese");
        assert_eq!(language_type("ko-KR"), "Korean");
        assert_eq!(language_type("fr-FR"), "Auto");
        assert_eq!(language_type(""), "Auto");
    }

    #[test]
    fn audio_url_wins_over_audio_object() {
        let body = json!({"output": {"audio_url": "https://cdn/a.wav", "audio": {"data": "AAAA"}}});
        assert_eq!(
            response_audio(&body, 200).unwrap(),
            ChunkPayload::Url("https://cdn/a.wav".into())
        );

        let body = json!({"output": {"audio": {"url": "https://cdn/b.wav", "data": ""}}});
        assert_eq!(
            response_audio(&body, 200).unwrap(),
            ChunkPayload::Url("https://cdn/b.wav".into())
        );

        let body = json!({"output": {"audio": "UklGRg=="}});
        assert_eq!(
            response_audio(&body, 200).unwrap(),
            ChunkPayload::Base64("UklGRg==".into())
        );
    }

    #[test]
    fn missing_audio_is_an_api_failure() {
        let err = response_audio(&json!({"output": {"finish_reason": "stop"}}), 200).unwrap_err();
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Api);

        let err = response_audio(
            &json!({"code": "DataInspectionFailed", "message": "bad input"}),
            200,
        )
        .unwrap_err();
        assert!(err.to_string().contains("DataInspectionFailed"));
    }

    #[test]
    fn stream_frames_only_yield_inline_data() {
        let chunk = json!({"output": {"audio": {"data": "AAAA", "id": "x"}}});
        assert_eq!(
            frame_audio(&chunk, 200).unwrap(),
            Some(ChunkPayload::Base64("AAAA".into()))
        );
        let closing = json!({"output": {"finish_reason": "stop", "audio": {"url": "https://cdn/full.wav", "data": ""}}});
        assert_eq!(frame_audio(&closing, 200).unwrap(), None);
        assert!(frame_audio(&json!({"code": "Throttling", "message": "slow down"}), 200).is_err());
    }

    #[test]
    fn error_message_prefers_json_message() {
        assert_eq!(
            error_message(r#"{"code":"InvalidApiKey","message":"Invalid API-key provided."}"#, 401),
            "Invalid API-key provided."
        );
        assert_eq!(error_message("", 502), "HTTP 502");
        assert_eq!(error_message("upstream exploded", 500), "upstream exploded");
    }
}
