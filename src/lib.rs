//! # tts-relay
//!
//! 语音合成编排层：统一的合成接口、云端/本地引擎自动回退、流式音频分片的有序播放。
//!
//! Speech synthesis orchestration: one stable synthesis contract in front of
//! interchangeable engines, automatic degradation to a working engine, and bounded,
//! ordered playback of streamed audio.
//!
//! ## Overview
//!
//! ```text
//! caller ─▶ FallbackCoordinator ─▶ Orchestrator ─▶ active Engine ─┬─▶ direct completion
//!                 ▲                     │                          └─▶ StreamingPlaybackQueue ─▶ AudioSink
//!                 └── classify, retry, switch, roll back ◀── error
//! ```
//!
//! - **Engines** implement [`engine::Engine`]: [`engine::RemoteEngine`] speaks the
//!   DashScope protocol (single clip or SSE stream), [`engine::LocalEngine`] drives
//!   a runtime-owned [`engine::SpeechDevice`].
//! - **[`Orchestrator`]** holds the active engine, merges options with stored
//!   preferences and emits lifecycle events. It never retries.
//! - **[`FallbackCoordinator`]** classifies failures ([`ErrorClass`]), retries audio
//!   glitches, falls back along the chain and rolls back when the fallback fails too.
//! - **[`StreamingPlaybackQueue`]** buffers, sequences and plays chunks with a
//!   per-chunk timeout and a TTL-bounded capacity.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tts_relay::config::{ConfigKey, ConfigStore, MemoryConfigStore, RelayConfig};
//! use tts_relay::engine::{LocalEngine, NullSpeechDevice, RemoteEngine};
//! use tts_relay::notify::TracingNotificationSink;
//! use tts_relay::playback::{FileSink, StreamingPlaybackQueue};
//! use tts_relay::{FallbackCoordinator, Orchestrator, SynthesisOptions};
//!
//! #[tokio::main]
//! async fn main() -> tts_relay::Result<()> {
//!     let cfg = RelayConfig::default().apply_env_overrides();
//!     let store: Arc<dyn ConfigStore> =
//!         Arc::new(MemoryConfigStore::new().with(ConfigKey::Credential, "sk-..."));
//!     let queue = Arc::new(StreamingPlaybackQueue::new(
//!         Arc::new(FileSink::new("out")?),
//!         cfg.playback.clone(),
//!     ));
//!
//!     let orchestrator = Orchestrator::builder(store.clone())
//!         .defaults(cfg.defaults.clone())
//!         .engine(Arc::new(RemoteEngine::new(cfg.remote.clone(), store.clone(), queue)?))
//!         .engine(Arc::new(LocalEngine::new(cfg.local.clone(), Arc::new(NullSpeechDevice))))
//!         .build()?;
//!
//!     let relay = FallbackCoordinator::new(
//!         Arc::new(orchestrator),
//!         &cfg.fallback,
//!         Arc::new(TracingNotificationSink),
//!     )?;
//!     relay.synthesize("你好，世界", &SynthesisOptions::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | Engine contract, remote and local engines |
//! | [`orchestrator`] | Active engine slot, option merging, lifecycle events |
//! | [`fallback`] | Retry / fallback state machine and chain |
//! | [`playback`] | Chunk normalization, streaming queue, audio sinks |
//! | [`config`] | YAML configuration and the preference store |
//! | [`transport`] | HTTP transport and SSE framing |
//! | [`notify`] | User-facing notification sinks |
//! | [`types`] | Requests, options and voices |

pub mod config;
pub mod engine;
pub mod fallback;
pub mod notify;
pub mod orchestrator;
pub mod playback;
pub mod transport;
pub mod types;

pub mod error;
pub mod error_class;

pub use error::{Error, ErrorContext};
pub use error_class::ErrorClass;

pub use engine::{Engine, EngineCapabilities, EngineDescriptor, SynthesisOutcome};
pub use fallback::FallbackCoordinator;
pub use orchestrator::{Orchestrator, SynthesisEvent};
pub use playback::{AudioSink, StreamingPlaybackQueue};
pub use types::{SynthesisOptions, SynthesisRequest, VoiceInfo};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
