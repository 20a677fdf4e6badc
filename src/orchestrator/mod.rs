//! 编排器：持有唯一的活动引擎，合并请求选项并委派给引擎。
//!
//! Orchestrator.
//!
//! Owns the single active-engine slot and the engine registry. It merges caller
//! options over persisted preferences, validates against the active engine, delegates
//! and reports the outcome as [`SynthesisEvent`]s. It never retries or falls back;
//! that is the job of [`crate::fallback::FallbackCoordinator`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tts_relay::config::{MemoryConfigStore, RelayConfig};
//! use tts_relay::engine::{LocalEngine, NullSpeechDevice};
//! use tts_relay::{Orchestrator, SynthesisOptions};
//!
//! # async fn run() -> tts_relay::Result<()> {
//! let cfg = RelayConfig::default();
//! let local = LocalEngine::new(cfg.local.clone(), Arc::new(NullSpeechDevice));
//! let orchestrator = Orchestrator::builder(Arc::new(MemoryConfigStore::new()))
//!     .defaults(cfg.defaults.clone())
//!     .engine(Arc::new(local))
//!     .build()?;
//! orchestrator.synthesize("你好", &SynthesisOptions::new()).await?;
//! # Ok(())
//! # }
//! ```

mod events;

pub use events::{EventBus, ListenerId, SynthesisEvent};

use crate::config::{ConfigKey, ConfigStore, SynthesisDefaults};
use crate::engine::{Engine, EngineDescriptor, SynthesisOutcome};
use crate::types::{SynthesisOptions, SynthesisRequest, VoiceInfo};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct OrchestratorBuilder {
    store: Arc<dyn ConfigStore>,
    defaults: SynthesisDefaults,
    engines: Vec<Arc<dyn Engine>>,
}

impl OrchestratorBuilder {
    pub fn defaults(mut self, defaults: SynthesisDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// The initial active engine is the persisted `engine` preference when it names a
    /// registered engine, then `defaults.engine`, then the first registered engine.
    pub fn build(self) -> Result<Orchestrator> {
        if self.engines.is_empty() {
            return Err(Error::configuration("orchestrator needs at least one engine"));
        }

        let mut registry = HashMap::new();
        let mut order = Vec::new();
        for engine in self.engines {
            let id = engine.id().to_string();
            if registry.insert(id.clone(), engine).is_some() {
                return Err(Error::configuration_with_context(
                    format!("engine '{}' registered twice", id),
                    ErrorContext::new().with_engine(id),
                ));
            }
            order.push(id);
        }

        let active = self
            .store
            .get(ConfigKey::Engine)
            .filter(|id| registry.contains_key(id))
            .or_else(|| Some(self.defaults.engine.clone()).filter(|id| registry.contains_key(id)))
            .unwrap_or_else(|| order[0].clone());

        debug!(active = %active, engines = ?order, "orchestrator built");
        Ok(Orchestrator {
            registry,
            order,
            active: ArcSwap::from_pointee(active),
            store: self.store,
            defaults: self.defaults,
            events: EventBus::new(),
            request_gate: tokio::sync::Mutex::new(()),
            switch_gate: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }
}

pub struct Orchestrator {
    registry: HashMap<String, Arc<dyn Engine>>,
    order: Vec<String>,
    active: ArcSwap<String>,
    store: Arc<dyn ConfigStore>,
    defaults: SynthesisDefaults,
    events: EventBus,
    request_gate: tokio::sync::Mutex<()>,
    switch_gate: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn ConfigStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            defaults: SynthesisDefaults::default(),
            engines: Vec::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn defaults(&self) -> &SynthesisDefaults {
        &self.defaults
    }

    pub fn active_engine_id(&self) -> String {
        (*self.active.load_full()).clone()
    }

    pub fn active_engine(&self) -> Result<Arc<dyn Engine>> {
        let id = self.active.load_full();
        self.engine(&id)
            .ok_or_else(|| Error::UnknownEngine { id: id.to_string() })
    }

    pub fn engine(&self, id: &str) -> Option<Arc<dyn Engine>> {
        self.registry.get(id).cloned()
    }

    /// Registered engines, in registration order.
    pub fn engines(&self) -> Vec<EngineDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|e| e.descriptor().clone())
            .collect()
    }

    /// Initialize the active engine.
    pub async fn initialize(&self) -> Result<()> {
        self.active_engine()?.initialize().await
    }

    pub async fn available_voices(&self) -> Result<Vec<VoiceInfo>> {
        self.active_engine()?.available_voices().await
    }

    /// Merge `options` over the config store, then over the configured defaults.
    pub fn build_request(&self, text: &str, options: &SynthesisOptions) -> SynthesisRequest {
        let store = &self.store;
        let d = &self.defaults;
        let voice = options
            .voice
            .clone()
            .or_else(|| store.get(ConfigKey::Voice).filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| d.voice.clone());
        let language = options.language.clone().unwrap_or_else(|| d.language.clone());
        let speed = options
            .speed
            .or_else(|| store.get_f32(ConfigKey::Speed))
            .unwrap_or(d.speed);
        let volume = options
            .volume
            .or_else(|| store.get_u8(ConfigKey::Volume))
            .unwrap_or(d.volume);
        let stream = options
            .stream
            .or_else(|| store.get_bool(ConfigKey::StreamingEnabled))
            .unwrap_or(d.streaming);

        SynthesisRequest::new(text, voice, language)
            .with_speed(speed)
            .with_volume(volume)
            .with_stream(stream)
    }

    /// One synthesis on the active engine. Requests are serialized.
    pub async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesisOutcome> {
        let _gate = self.lock_requests().await;
        let cancel = self.cancel_token();
        let request = self.build_request(text, options);
        self.run(&request, &cancel).await
    }

    pub(crate) async fn lock_requests(&self) -> MutexGuard<'_, ()> {
        self.request_gate.lock().await
    }

    /// Token cancelled by the next [`stop`](Self::stop).
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Validate and run `request` on the active engine. The caller holds the request gate.
    ///
    /// Events carry `request` as given; the engine sees it with `stream` cleared when it
    /// cannot stream. Firing `cancel` abandons the engine call.
    pub(crate) async fn run(
        &self,
        request: &SynthesisRequest,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome> {
        let engine = self.active_engine()?;
        let engine_id = engine.id().to_string();

        let stream = request.stream && engine.descriptor().capabilities.streaming;
        let effective = SynthesisRequest {
            stream,
            ..request.clone()
        };

        engine.validate_options(&effective).into_result()?;

        debug!(
            engine = %engine_id,
            request_id = %request.request_id,
            attempt = request.retry_count,
            stream,
            "synthesis started"
        );
        self.events.emit(&SynthesisEvent::Started {
            request,
            engine_id: &engine_id,
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = engine.synthesize(&effective) => res,
        };

        match result {
            Ok(outcome) => {
                self.events.emit(&SynthesisEvent::Ended {
                    request,
                    outcome: &outcome,
                });
                Ok(outcome)
            }
            Err(e) if e.is_cancelled() => {
                self.events.emit(&SynthesisEvent::Stopped {
                    request,
                    engine_id: &engine_id,
                });
                Err(e)
            }
            Err(e) => {
                warn!(engine = %engine_id, request_id = %request.request_id, error = %e, "synthesis failed");
                self.events.emit(&SynthesisEvent::Error {
                    request,
                    engine_id: &engine_id,
                    error: &e,
                });
                Err(e)
            }
        }
    }

    /// Make `id` the active engine.
    ///
    /// Current playback is stopped and the target initialized; only then is the switch
    /// committed and persisted. On failure the previous engine stays active. Concurrent
    /// switches wait for each other.
    pub async fn switch_engine(&self, id: &str) -> Result<()> {
        let _switch = self.switch_gate.lock().await;
        let target = self
            .engine(id)
            .ok_or_else(|| Error::UnknownEngine { id: id.to_string() })?;
        let from = self.active_engine_id();

        self.stop_engine(&from).await;

        if let Err(e) = target.initialize().await {
            warn!(from = %from, to = %id, error = %e, "engine switch failed, keeping current engine");
            return Err(e);
        }

        self.commit(&from, id);
        Ok(())
    }

    /// Put `id` back without initializing it. Used to roll back a failed fallback.
    pub(crate) async fn restore_engine(&self, id: &str) -> Result<()> {
        let _switch = self.switch_gate.lock().await;
        if !self.registry.contains_key(id) {
            return Err(Error::UnknownEngine { id: id.to_string() });
        }
        let from = self.active_engine_id();
        if from == id {
            return Ok(());
        }
        self.stop_engine(&from).await;
        self.commit(&from, id);
        Ok(())
    }

    fn commit(&self, from: &str, to: &str) {
        self.active.store(Arc::new(to.to_string()));
        if let Err(e) = self.store.save(ConfigKey::Engine, to) {
            warn!(engine = %to, error = %e, "failed to persist active engine");
        }
        info!(from = %from, to = %to, "active engine changed");
        if from != to {
            self.events.emit(&SynthesisEvent::EngineChanged { from, to });
        }
    }

    async fn stop_engine(&self, id: &str) {
        if let Some(engine) = self.engine(id) {
            if let Err(e) = engine.stop().await {
                warn!(engine = %id, error = %e, "engine failed to stop");
            }
        }
    }

    /// Stop the active engine and cancel the request in progress, if any.
    ///
    /// Safe to call at any time, any number of times.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut token = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
            token.cancel();
            *token = CancellationToken::new();
        }
        self.active_engine()?.stop().await
    }
}
