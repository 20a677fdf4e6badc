//! 用户通知：错误提示与引擎回退提示的输出端。
//!
//! User-facing notifications.
//!
//! Rendering is up to the embedding application; the crate only decides *when* to
//! notify. The fallback coordinator emits exactly one notification per fallback
//! transition and one per terminal failure.
//!
//! | Sink | Description |
//! |------|-------------|
//! | [`TracingNotificationSink`] | Routes notifications to `tracing` (no UI attached) |
//! | [`MemoryNotificationSink`] | Records notifications, for tests and inspection |
//! | [`CompositeNotificationSink`] | Fans out to several sinks |

use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

pub trait NotificationSink: Send + Sync {
    fn show_error(&self, message: &str, severity: Severity);
    fn show_fallback_notification(&self, from: &str, to: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn show_error(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "tts_relay::notify", "{}", message),
            Severity::Warning => warn!(target: "tts_relay::notify", "{}", message),
            Severity::Error => error!(target: "tts_relay::notify", "{}", message),
        }
    }

    fn show_fallback_notification(&self, from: &str, to: &str) {
        warn!(target: "tts_relay::notify", from, to, "switched speech engine");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Error { message: String, severity: Severity },
    Fallback { from: String, to: String },
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    records: RwLock<Vec<Notification>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.records
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<(String, Severity)> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error { message, severity } => Some((message, severity)),
                _ => None,
            })
            .collect()
    }

    pub fn fallbacks(&self) -> Vec<(String, String)> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Fallback { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut r) = self.records.write() {
            r.clear();
        }
    }

    fn push(&self, n: Notification) {
        if let Ok(mut r) = self.records.write() {
            r.push(n);
        }
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn show_error(&self, message: &str, severity: Severity) {
        self.push(Notification::Error {
            message: message.to_string(),
            severity,
        });
    }

    fn show_fallback_notification(&self, from: &str, to: &str) {
        self.push(Notification::Fallback {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

#[derive(Default)]
pub struct CompositeNotificationSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl CompositeNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for CompositeNotificationSink {
    fn show_error(&self, message: &str, severity: Severity) {
        for s in &self.sinks {
            s.show_error(message, severity);
        }
    }

    fn show_fallback_notification(&self, from: &str, to: &str) {
        for s in &self.sinks {
            s.show_fallback_notification(from, to);
        }
    }
}
