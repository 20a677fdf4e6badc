//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tts_relay::config::{MemoryConfigStore, PlaybackConfig};
use tts_relay::engine::{
    Engine, EngineCapabilities, EngineDescriptor, SynthesisOutcome,
};
use tts_relay::playback::{AudioSink, ChunkPayload, PlayableUnit};
use tts_relay::types::{OptionsValidation, SynthesisRequest, VoiceInfo};
use tts_relay::{Error, Result};

/// Payload prefixes understood by [`RecordingSink`].
pub const SLOW: &[u8] = b"slow";
pub const FAIL: &[u8] = b"fail";

pub fn chunk(label: &str) -> ChunkPayload {
    ChunkPayload::Binary(Bytes::copy_from_slice(label.as_bytes()))
}

pub fn fast_playback() -> PlaybackConfig {
    PlaybackConfig {
        capacity: 50,
        buffer_threshold: 5,
        chunk_timeout_ms: 5_000,
        chunk_ttl_ms: 30_000,
    }
}

/// Sink that records what it played.
///
/// Units whose bytes start with [`SLOW`] never finish on their own; units starting
/// with [`FAIL`] fail immediately. Everything else plays for `play_time`.
#[derive(Default)]
pub struct RecordingSink {
    pub played: Mutex<Vec<String>>,
    pub started: Mutex<Vec<(String, Instant)>>,
    pub stops: AtomicUsize,
    pub play_time: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_play_time(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_time,
            ..Self::default()
        })
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }
}

fn label(unit: &PlayableUnit) -> String {
    match unit {
        PlayableUnit::Audio(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        PlayableUnit::Remote(url) => url.to_string(),
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, unit: &PlayableUnit, _volume: f32) -> Result<()> {
        let label = label(unit);
        self.started
            .lock()
            .unwrap()
            .push((label.clone(), Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if label.as_bytes().starts_with(FAIL) {
            return Err(Error::audio(format!("device rejected {label}")));
        }
        if label.as_bytes().starts_with(SLOW) {
            std::future::pending::<()>().await;
        }
        if !self.play_time.is_zero() {
            tokio::time::sleep(self.play_time).await;
        }
        self.played.lock().unwrap().push(label);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a [`ScriptedEngine`] does on one `synthesize` call.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    /// Succeed after the given (tokio) time.
    SucceedAfter(Duration),
    Remote(u16),
    Audio,
    Network,
    Generic,
    /// Block until the engine is stopped.
    Hang,
}

impl Step {
    fn error(&self) -> Option<Error> {
        match self {
            Step::Remote(status) => Some(Error::Remote {
                status: *status,
                message: format!("scripted HTTP {status}"),
                retryable: (500..600).contains(status) || *status == 429,
            }),
            Step::Audio => Some(Error::audio("scripted playback failure")),
            Step::Network => Some(Error::runtime("connection refused by scripted peer")),
            Step::Generic => Some(Error::runtime("something odd happened")),
            _ => None,
        }
    }
}

/// Engine whose results are scripted per call. Once the script runs out, calls succeed.
pub struct ScriptedEngine {
    descriptor: EngineDescriptor,
    script: Mutex<VecDeque<Step>>,
    pub calls: Mutex<Vec<SynthesisRequest>>,
    pub call_times: Mutex<Vec<(Instant, Instant)>>,
    pub init_error: AtomicBool,
    pub inits: AtomicUsize,
    pub stops: AtomicUsize,
    pub available: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl ScriptedEngine {
    pub fn new(id: &str, streaming: bool) -> Arc<Self> {
        Arc::new(Self {
            descriptor: EngineDescriptor::new(
                id,
                format!("scripted {id}"),
                EngineCapabilities {
                    streaming,
                    max_text_length: Some(100),
                    languages: Vec::new(),
                },
            ),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
            init_error: AtomicBool::new(false),
            inits: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn script(self: &Arc<Self>, steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        self.script.lock().unwrap().extend(steps);
        self.clone()
    }

    pub fn failing_init(self: &Arc<Self>) -> Arc<Self> {
        self.init_error.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn calls(&self) -> Vec<SynthesisRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn initialize(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.init_error.load(Ordering::SeqCst) {
            return Err(Error::configuration(format!(
                "{} cannot start on this runtime",
                self.descriptor.id
            )));
        }
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome> {
        let started = Instant::now();
        self.calls.lock().unwrap().push(request.clone());
        let token = self.cancel.lock().unwrap().clone();
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);

        match &step {
            Step::SucceedAfter(d) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(*d) => {}
                }
            }
            Step::Hang => {
                token.cancelled().await;
                return Err(Error::Cancelled);
            }
            _ => {}
        }
        self.call_times
            .lock()
            .unwrap()
            .push((started, Instant::now()));

        match step.error() {
            Some(e) => Err(e),
            None => Ok(SynthesisOutcome {
                engine_id: self.descriptor.id.clone(),
                playback: None,
            }),
        }
    }

    async fn available_voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo::new(
            "v1",
            "Voice One",
            "scripted",
            self.descriptor.id.clone(),
        )])
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut token = self.cancel.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn validate_options(&self, request: &SynthesisRequest) -> OptionsValidation {
        let mut v = OptionsValidation::new();
        if request.text.is_empty() {
            v.reject("text must not be empty");
        }
        if !(0.5..=2.0).contains(&request.speed) {
            v.reject("speed out of range");
        }
        if request.volume > 100 {
            v.reject("volume out of range");
        }
        v
    }
}

pub fn memory_store() -> Arc<MemoryConfigStore> {
    Arc::new(MemoryConfigStore::new())
}
