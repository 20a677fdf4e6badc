//! 回退协调器：失败分类、同引擎重试与按链回退（失败时回滚）。
//!
//! Fallback coordinator.
//!
//! Wraps the [`Orchestrator`] and turns a failed attempt into one of three outcomes:
//!
//! ```text
//! failure ─▶ classify ─┬─ audio, retries left ─────────▶ wait attempt×1s, retry same engine
//!                      ├─ next engine in chain ─────────▶ switch, reissue original request
//!                      │     └─ that fails too ─────────▶ roll back, aggregate error
//!                      └─ terminal engine / disabled ──▶ propagate
//! ```
//!
//! At most one switch happens per request. A `stop()` during a request is not a
//! failure: it is never retried, never falls back and never notified.

mod chain;
mod policy;

pub use chain::{ChainCursor, FallbackChain};
pub use policy::FallbackPolicy;

use crate::config::{ConfigKey, FallbackConfig};
use crate::engine::{SynthesisOutcome, REMOTE_ENGINE_ID};
use crate::notify::{NotificationSink, Severity};
use crate::orchestrator::Orchestrator;
use crate::types::{SynthesisOptions, SynthesisRequest};
use crate::{Error, ErrorClass, Result};
use policy::Decision;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct FallbackCoordinator {
    orchestrator: Arc<Orchestrator>,
    chain: FallbackChain,
    policy: FallbackPolicy,
    notifier: Arc<dyn NotificationSink>,
}

impl FallbackCoordinator {
    /// Every id in `config.chain` must be registered with `orchestrator`.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        config: &FallbackConfig,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let chain = FallbackChain::new(config.chain.iter().cloned())?;
        if let Some(id) = chain.ids().iter().find(|id| orchestrator.engine(id).is_none()) {
            return Err(Error::UnknownEngine { id: id.clone() });
        }
        Ok(Self {
            orchestrator,
            chain,
            policy: FallbackPolicy::from_config(config),
            notifier,
        })
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub async fn stop(&self) -> Result<()> {
        self.orchestrator.stop().await
    }

    /// Synthesize with retry and fallback.
    ///
    /// Requests are serialized with those issued directly on the orchestrator. A
    /// terminal failure produces exactly one error notification.
    pub async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesisOutcome> {
        let _gate = self.orchestrator.lock_requests().await;
        let cancel = self.orchestrator.cancel_token();
        let request = self.orchestrator.build_request(text, options);

        let result = self.drive(request, &cancel).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                self.notifier
                    .show_error(&format!("Speech synthesis failed: {}", e), severity(e));
            }
        }
        result
    }

    fn fallback_enabled(&self) -> bool {
        self.orchestrator
            .store()
            .get_bool(ConfigKey::FallbackEnabled)
            .unwrap_or(self.orchestrator.defaults().fallback_enabled)
    }

    async fn drive(
        &self,
        original: SynthesisRequest,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome> {
        let mut cursor = self.chain.cursor(&self.orchestrator.active_engine_id());
        let mut request = original.clone();
        // Set once the single allowed switch has happened: (from, error that caused it).
        let mut switched: Option<(String, Error)> = None;

        loop {
            if cancel.is_cancelled() {
                return self.abandon(switched, Error::Cancelled).await;
            }

            let engine_id = self.orchestrator.active_engine_id();
            let err = match self.orchestrator.run(&request, cancel).await {
                Ok(_) if cancel.is_cancelled() => {
                    return self.abandon(switched, Error::Cancelled).await;
                }
                Ok(outcome) => {
                    if let Some((from, _)) = &switched {
                        info!(from = %from, to = %engine_id, request_id = %request.request_id, "fallback succeeded");
                        self.notifier.show_fallback_notification(from, &engine_id);
                    }
                    return Ok(outcome);
                }
                Err(e) => e,
            };

            if err.is_cancelled() || cancel.is_cancelled() {
                return self.abandon(switched, Error::Cancelled).await;
            }

            let class = ErrorClass::classify(&err);
            if class == ErrorClass::Authentication && engine_id == REMOTE_ENGINE_ID {
                self.clear_credential();
            }

            let decision = if matches!(err, Error::InvalidOptions { .. }) {
                Decision::Fail
            } else {
                let can_fall_back = switched.is_none()
                    && cursor.peek_next().is_some()
                    && self.fallback_enabled();
                self.policy.decide(class, request.retry_count, can_fall_back)
            };

            info!(
                engine = %engine_id,
                request_id = %request.request_id,
                class = class.name(),
                attempt = request.retry_count,
                decision = ?decision,
                "synthesis attempt failed"
            );

            match decision {
                Decision::Retry { delay } => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.abandon(switched, Error::Cancelled).await;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    request = request.next_attempt();
                }
                Decision::Fallback => {
                    let Some(to) = cursor.peek_next() else {
                        return Err(err);
                    };
                    if let Err(switch_err) = self.orchestrator.switch_engine(to).await {
                        // Nothing was committed, the original engine is still active.
                        return Err(Error::Fallback {
                            from: engine_id,
                            to: to.to_string(),
                            original: Box::new(err),
                            fallback: Box::new(switch_err),
                        });
                    }
                    cursor.advance();
                    switched = Some((engine_id, err));
                    request = original.reissue();
                }
                Decision::Fail => {
                    return match switched {
                        Some((from, original_err)) => {
                            self.rollback(&from).await;
                            Err(Error::Fallback {
                                from,
                                to: engine_id,
                                original: Box::new(original_err),
                                fallback: Box::new(err),
                            })
                        }
                        None => Err(err),
                    };
                }
            }
        }
    }

    async fn abandon(
        &self,
        switched: Option<(String, Error)>,
        err: Error,
    ) -> Result<SynthesisOutcome> {
        if let Some((from, _)) = switched {
            self.rollback(&from).await;
        }
        Err(err)
    }

    async fn rollback(&self, to: &str) {
        match self.orchestrator.restore_engine(to).await {
            Ok(()) => info!(engine = %to, "fallback rolled back"),
            Err(e) => warn!(engine = %to, error = %e, "fallback rollback failed"),
        }
    }

    fn clear_credential(&self) {
        match self.orchestrator.store().remove(ConfigKey::Credential) {
            Ok(()) => warn!(engine = REMOTE_ENGINE_ID, "credential rejected, cleared from config store"),
            Err(e) => warn!(error = %e, "failed to clear rejected credential"),
        }
    }
}

fn severity(err: &Error) -> Severity {
    match err {
        Error::InvalidOptions { .. } | Error::Configuration { .. } => Severity::Warning,
        _ => Severity::Error,
    }
}
