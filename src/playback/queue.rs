//! Bounded, ordered playback of streamed audio chunks.
//!
//! ```text
//!          enqueue                threshold reached           producer ended and
//!   idle ──────────▶ buffering ───or producer ended──▶ draining ───queue empty────▶ idle
//!     ▲                                                                             │
//!     └──────────────────────────── stop() from any state ──────────────────────────┘
//! ```
//!
//! Exactly one chunk is handed to the sink at a time, in enqueue order. A chunk that
//! errors or outlives the per-chunk timeout is dropped and the next one proceeds; the
//! overall call only fails when no chunk could be played.

use super::chunk::{ChunkPayload, PlaybackChunk, ResourceLease};
use super::AudioSink;
use crate::config::PlaybackConfig;
use crate::{Error, Result};
use futures::future::{Fuse, FusedFuture, FutureExt};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Buffering,
    Draining,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub played: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub state: QueueState,
    pub pending: usize,
    pub held_resources: usize,
    pub stats: QueueStats,
}

/// Outcome of one `process_streaming_audio` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub played: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// The producer stream ended with an error after at least one chunk played.
    pub truncated: bool,
}

impl PlaybackReport {
    fn attempted(&self) -> u64 {
        self.played + self.failed + self.timed_out
    }
}

struct Inner {
    state: QueueState,
    pending: VecDeque<PlaybackChunk>,
    next_sequence: u64,
    stats: QueueStats,
}

enum ChunkResult {
    Played,
    Failed(Error),
    TimedOut,
    Cancelled,
}

type PlayFuture = Pin<Box<dyn Future<Output = (u64, ChunkResult)> + Send>>;

pub struct StreamingPlaybackQueue {
    sink: Arc<dyn AudioSink>,
    config: PlaybackConfig,
    inner: Mutex<Inner>,
    cancel: Mutex<CancellationToken>,
    resources: Arc<AtomicUsize>,
    run_gate: tokio::sync::Mutex<()>,
}

impl StreamingPlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>, config: PlaybackConfig) -> Self {
        Self {
            sink,
            config,
            inner: Mutex::new(Inner {
                state: QueueState::Idle,
                pending: VecDeque::new(),
                next_sequence: 0,
                stats: QueueStats::default(),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            resources: Arc::new(AtomicUsize::new(0)),
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Plain data, safe to use after a poisoning panic.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            state: inner.state,
            pending: inner.pending.len(),
            held_resources: self.resources.load(Ordering::SeqCst),
            stats: inner.stats.clone(),
        }
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Normalize and append one chunk, evicting if the queue is full.
    ///
    /// Returns the chunk's sequence number. A payload that cannot be normalized fails
    /// with [`Error::ChunkFormat`] and leaves the queue untouched.
    pub fn enqueue(&self, payload: ChunkPayload) -> Result<u64> {
        let unit = match payload.normalize() {
            Ok(unit) => unit,
            Err(e) => {
                self.lock().stats.failed += 1;
                return Err(e);
            }
        };

        let now = Instant::now();
        let mut inner = self.lock();
        self.evict_for_capacity(&mut inner, now);

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.pending.push_back(PlaybackChunk {
            sequence,
            unit,
            enqueued_at: now,
            _lease: ResourceLease::acquire(&self.resources),
        });
        inner.stats.enqueued += 1;
        if inner.state == QueueState::Idle {
            inner.state = QueueState::Buffering;
        }
        Ok(sequence)
    }

    fn evict_for_capacity(&self, inner: &mut Inner, now: Instant) {
        let capacity = self.config.capacity.max(1);
        let ttl = self.config.chunk_ttl();

        // Expired chunks sit at the front; drop those first.
        while inner.pending.len() >= capacity {
            let expired = inner
                .pending
                .front()
                .map(|c| now.saturating_duration_since(c.enqueued_at) > ttl)
                .unwrap_or(false);
            if !expired {
                break;
            }
            if let Some(chunk) = inner.pending.pop_front() {
                inner.stats.evicted += 1;
                warn!(sequence = chunk.sequence, "evicting expired audio chunk");
            }
        }

        while inner.pending.len() >= capacity {
            if let Some(chunk) = inner.pending.pop_front() {
                inner.stats.evicted += 1;
                warn!(
                    sequence = chunk.sequence,
                    capacity, "audio queue full, evicting oldest chunk"
                );
            }
        }
    }

    /// Consume a producer stream and play every chunk in order.
    ///
    /// Chunks already waiting from [`enqueue`](Self::enqueue) play first. The producer is
    /// not polled while the queue is full. Calls are serialized.
    pub async fn process_streaming_audio<S>(&self, chunks: S, volume: f32) -> Result<PlaybackReport>
    where
        S: Stream<Item = Result<ChunkPayload>> + Send,
    {
        let _run = self.run_gate.lock().await;
        let cancel = self.token();
        let threshold = self.config.effective_threshold();
        let capacity = self.config.capacity.max(1);
        let chunk_timeout = self.config.chunk_timeout();

        {
            let mut inner = self.lock();
            if inner.state == QueueState::Idle {
                inner.state = QueueState::Buffering;
            }
        }

        let mut chunks = Box::pin(chunks);
        let mut producer_done = false;
        let mut producer_error: Option<Error> = None;
        let mut report = PlaybackReport::default();
        let mut in_flight: Fuse<PlayFuture> = Fuse::terminated();

        loop {
            let (next, pending) = {
                let mut inner = self.lock();
                if inner.state == QueueState::Buffering
                    && !inner.pending.is_empty()
                    && (inner.pending.len() >= threshold || producer_done)
                {
                    inner.state = QueueState::Draining;
                    debug!(buffered = inner.pending.len(), "playback buffer ready, draining");
                }
                let next = if in_flight.is_terminated() && inner.state == QueueState::Draining {
                    inner.pending.pop_front()
                } else {
                    None
                };
                (next, inner.pending.len())
            };

            if let Some(chunk) = next {
                let fut: PlayFuture = Box::pin(play_chunk(
                    self.sink.clone(),
                    chunk,
                    volume,
                    chunk_timeout,
                    cancel.clone(),
                ));
                in_flight = fut.fuse();
            }

            if producer_done && in_flight.is_terminated() && pending == 0 {
                break;
            }

            let accepting = !producer_done && pending < capacity;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    // Dropping the in-flight future abandons the chunk and releases it.
                    drop(in_flight);
                    debug!("playback cancelled");
                    return Err(Error::Cancelled);
                }

                (sequence, result) = &mut in_flight, if !in_flight.is_terminated() => {
                    self.record(sequence, result, &mut report);
                }

                item = chunks.next(), if accepting => match item {
                    Some(Ok(payload)) => {
                        if let Err(e) = self.enqueue(payload) {
                            report.failed += 1;
                            warn!(error = %e, "dropping malformed audio chunk");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "audio producer failed, ending stream");
                        producer_error = Some(e);
                        producer_done = true;
                    }
                    None => producer_done = true,
                },
            }
        }

        {
            let mut inner = self.lock();
            if inner.pending.is_empty() {
                inner.state = QueueState::Idle;
            }
        }

        if report.played == 0 {
            if let Some(e) = producer_error {
                return Err(e);
            }
            if report.attempted() == 0 {
                return Err(Error::audio("stream produced no audio chunks"));
            }
            return Err(Error::audio(format!(
                "all {} audio chunks failed to play",
                report.attempted()
            )));
        }

        report.truncated = producer_error.is_some();
        info!(
            played = report.played,
            failed = report.failed,
            timed_out = report.timed_out,
            truncated = report.truncated,
            "streamed playback finished"
        );
        Ok(report)
    }

    fn record(&self, sequence: u64, result: ChunkResult, report: &mut PlaybackReport) {
        let mut inner = self.lock();
        match result {
            ChunkResult::Played => {
                report.played += 1;
                inner.stats.played += 1;
            }
            ChunkResult::Failed(e) => {
                report.failed += 1;
                inner.stats.failed += 1;
                warn!(sequence, error = %e, "audio chunk failed, skipping");
            }
            ChunkResult::TimedOut => {
                report.timed_out += 1;
                inner.stats.timed_out += 1;
                warn!(sequence, "audio chunk timed out, skipping");
            }
            ChunkResult::Cancelled => {}
        }
    }

    /// Cancel in-flight playback, drop every pending chunk and return to idle.
    ///
    /// Safe to call any number of times, in any state.
    pub async fn stop(&self) {
        {
            let mut token = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
            token.cancel();
            *token = CancellationToken::new();
        }
        let dropped = {
            let mut inner = self.lock();
            let dropped = inner.pending.len();
            inner.pending.clear();
            inner.state = QueueState::Idle;
            dropped
        };
        if dropped > 0 {
            debug!(dropped, "playback queue cleared");
        }
        if let Err(e) = self.sink.stop().await {
            warn!(error = %e, "audio sink failed to stop");
        }
    }
}

async fn play_chunk(
    sink: Arc<dyn AudioSink>,
    chunk: PlaybackChunk,
    volume: f32,
    limit: Duration,
    cancel: CancellationToken,
) -> (u64, ChunkResult) {
    let sequence = chunk.sequence;
    let result = tokio::select! {
        _ = cancel.cancelled() => ChunkResult::Cancelled,
        res = tokio::time::timeout(limit, sink.play(&chunk.unit, volume)) => match res {
            Ok(Ok(())) => ChunkResult::Played,
            Ok(Err(e)) => ChunkResult::Failed(e),
            Err(_) => ChunkResult::TimedOut,
        },
    };
    // The chunk (and its lease) is released here, before the next one starts.
    drop(chunk);
    (sequence, result)
}
