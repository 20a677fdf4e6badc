//! 音频播放：流式分片的缓冲、排序与播放。
//!
//! Playback of synthesized audio.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AudioSink`] | Where a normalized chunk actually becomes sound (device, file, test recorder) |
//! | [`ChunkPayload`] | Raw audio shape produced by a backend |
//! | [`PlayableUnit`] | Normalized audio handed to a sink |
//! | [`StreamingPlaybackQueue`] | Bounded FIFO with buffering threshold, per-chunk timeout and TTL eviction |
//! | [`FileSink`] | Sink that writes every chunk to a directory |

mod chunk;
mod queue;

pub use chunk::{ChunkPayload, PlayableUnit, PlaybackChunk};
pub use queue::{PlaybackReport, QueueSnapshot, QueueState, QueueStats, StreamingPlaybackQueue};

use crate::transport::TransportError;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Output device for normalized audio.
///
/// `play` resolves once the unit has finished playing. The queue bounds it with a
/// timeout and may drop the future at any point, which must abandon playback.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, unit: &PlayableUnit, volume: f32) -> Result<()>;

    /// Silence anything currently audible. Must be idempotent.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes each chunk to `<dir>/<n>.<ext>`. Remote chunks are downloaded first.
pub struct FileSink {
    dir: PathBuf,
    http: reqwest::Client,
    counter: AtomicU64,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            http: reqwest::Client::new(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn written(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    async fn resolve(&self, unit: &PlayableUnit) -> Result<bytes::Bytes> {
        match unit {
            PlayableUnit::Audio(bytes) => Ok(bytes.clone()),
            PlayableUnit::Remote(url) => {
                let resp = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| Error::Transport(TransportError::Http(e)))?;
                if !resp.status().is_success() {
                    return Err(Error::audio_with_context(
                        format!("audio download returned HTTP {}", resp.status().as_u16()),
                        ErrorContext::new()
                            .with_details(url.to_string())
                            .with_source("file_sink"),
                    ));
                }
                resp.bytes()
                    .await
                    .map_err(|e| Error::Transport(TransportError::Http(e)))
            }
        }
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, unit: &PlayableUnit, _volume: f32) -> Result<()> {
        let bytes = self.resolve(unit).await?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self
            .dir
            .join(format!("{:04}.{}", n, sniff_extension(&bytes)));
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "audio chunk written");
        Ok(())
    }
}

/// Guess a file extension from magic bytes.
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    match bytes {
        [b'R', b'I', b'F', b'F', ..] => "wav",
        [b'I', b'D', b'3', ..] | [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] => "mp3",
        [b'O', b'g', b'g', b'S', ..] => "ogg",
        [b'f', b'L', b'a', b'C', ..] => "flac",
        _ => "pcm",
    }
}
