//! Chunk payload normalization.
//!
//! A backend may hand over audio in three shapes: raw bytes, base64 text, or a URL.
//! Each is turned into exactly one [`PlayableUnit`] before it enters the queue, so the
//! queue and the sinks never deal with encodings.

use crate::{Error, Result};
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use url::Url;

/// Audio as produced by a backend, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Binary(Bytes),
    Base64(String),
    Url(String),
}

impl ChunkPayload {
    /// Interpret a JSON audio field.
    ///
    /// Accepted: a string (URL when it has an http(s) or data scheme, base64 otherwise),
    /// `{"url": ...}`, or `{"data": ...}`. Anything else is a [`Error::ChunkFormat`].
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::from_text(s)),
            Value::Object(map) => {
                if let Some(Value::String(url)) = map.get("url") {
                    if !url.is_empty() {
                        return Ok(Self::Url(url.clone()));
                    }
                }
                if let Some(Value::String(data)) = map.get("data") {
                    if !data.is_empty() {
                        return Ok(Self::Base64(data.clone()));
                    }
                }
                Err(Error::chunk_format(
                    "audio object carries neither a non-empty `url` nor `data`",
                ))
            }
            other => Err(Error::chunk_format(format!(
                "audio field has unsupported JSON type: {}",
                json_type(other)
            ))),
        }
    }

    fn from_text(s: &str) -> Self {
        let t = s.trim();
        if t.starts_with("http://") || t.starts_with("https://") || t.starts_with("data:") {
            Self::Url(t.to_string())
        } else {
            Self::Base64(t.to_string())
        }
    }

    /// Convert into a single playable unit.
    pub fn normalize(self) -> Result<PlayableUnit> {
        match self {
            Self::Binary(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::chunk_format("empty binary payload"));
                }
                Ok(PlayableUnit::Audio(bytes))
            }
            Self::Base64(text) => decode_base64(&text).map(PlayableUnit::Audio),
            Self::Url(raw) => {
                let url = Url::parse(&raw)
                    .map_err(|e| Error::chunk_format(format!("invalid audio url '{}': {}", raw, e)))?;
                match url.scheme() {
                    "http" | "https" => Ok(PlayableUnit::Remote(url)),
                    "data" => decode_data_url(&raw).map(PlayableUnit::Audio),
                    other => Err(Error::chunk_format(format!(
                        "unsupported audio url scheme '{}'",
                        other
                    ))),
                }
            }
        }
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_base64(text: &str) -> Result<Bytes> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::chunk_format("empty base64 payload"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map(Bytes::from)
        .map_err(|e| Error::chunk_format(format!("invalid base64 audio: {}", e)))
}

fn decode_data_url(raw: &str) -> Result<Bytes> {
    let (meta, data) = raw
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| Error::chunk_format("malformed data url"))?;
    if !meta.ends_with(";base64") {
        return Err(Error::chunk_format("data url is not base64-encoded"));
    }
    decode_base64(data)
}

/// Audio ready for a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayableUnit {
    /// Encoded audio held in memory.
    Audio(Bytes),
    /// Audio the sink fetches itself.
    Remote(Url),
}

impl PlayableUnit {
    pub fn len_hint(&self) -> usize {
        match self {
            Self::Audio(b) => b.len(),
            Self::Remote(_) => 0,
        }
    }
}

/// Counts one held playable resource for as long as it lives.
#[derive(Debug)]
pub(crate) struct ResourceLease(Arc<AtomicUsize>);

impl ResourceLease {
    pub(crate) fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A normalized chunk waiting in the queue. Dropping it releases its resource.
#[derive(Debug)]
pub struct PlaybackChunk {
    pub sequence: u64,
    pub unit: PlayableUnit,
    pub enqueued_at: Instant,
    pub(crate) _lease: ResourceLease,
}
