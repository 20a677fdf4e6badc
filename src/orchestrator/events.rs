//! Synchronous lifecycle events.
//!
//! Listeners run on the emitting task, in registration order. A listener that returns
//! an error or panics is logged and skipped; it never stops the listeners after it.

use crate::engine::SynthesisOutcome;
use crate::types::SynthesisRequest;
use crate::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub enum SynthesisEvent<'a> {
    Started {
        request: &'a SynthesisRequest,
        engine_id: &'a str,
    },
    Ended {
        request: &'a SynthesisRequest,
        outcome: &'a SynthesisOutcome,
    },
    Error {
        request: &'a SynthesisRequest,
        engine_id: &'a str,
        error: &'a Error,
    },
    /// `stop()` interrupted the request.
    Stopped {
        request: &'a SynthesisRequest,
        engine_id: &'a str,
    },
    EngineChanged {
        from: &'a str,
        to: &'a str,
    },
}

impl SynthesisEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "synthesis-started",
            Self::Ended { .. } => "synthesis-ended",
            Self::Error { .. } => "synthesis-error",
            Self::Stopped { .. } => "synthesis-stopped",
            Self::EngineChanged { .. } => "engine-changed",
        }
    }

    pub fn request(&self) -> Option<&SynthesisRequest> {
        match self {
            Self::Started { request, .. }
            | Self::Ended { request, .. }
            | Self::Error { request, .. }
            | Self::Stopped { request, .. } => Some(request),
            Self::EngineChanged { .. } => None,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SynthesisEvent<'_>) -> Result<()> + Send + Sync>;

struct Entry {
    id: ListenerId,
    name: String,
    listener: Listener,
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&SynthesisEvent<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = Entry {
            id,
            name: name.into(),
            listener: Arc::new(listener),
        };
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        let len = listeners.len();
        listeners.retain(|e| e.id != id);
        listeners.len() < len
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &SynthesisEvent<'_>) {
        // Snapshot first so a listener may (un)subscribe without deadlocking.
        let snapshot: Vec<(String, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|e| (e.name.clone(), e.listener.clone()))
            .collect();

        for (name, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = %name, event = event.name(), error = %e, "event listener failed")
                }
                Err(_) => warn!(listener = %name, event = event.name(), "event listener panicked"),
            }
        }
    }
}
