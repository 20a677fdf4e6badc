use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Option or configuration key that caused the error (e.g., "request.speed", "remote.endpoint")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "remote_engine", "playback_queue")
    pub source: Option<String>,
    /// Engine that was active when the error occurred
    pub engine_id: Option<String>,
    /// Transport status code, when the failure came from an HTTP exchange
    pub status_code: Option<u16>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_engine(mut self, engine_id: impl Into<String>) -> Self {
        self.engine_id = Some(engine_id.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

/// Unified error type for the synthesis runtime.
///
/// Variants are grouped so that [`crate::ErrorClass::classify`] can bucket them
/// without string matching whenever the failure is already typed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Invalid synthesis options: {}", .errors.join("; "))]
    InvalidOptions { errors: Vec<String> },

    #[error("Unknown engine: {id}")]
    UnknownEngine { id: String },

    #[error("Unsupported chunk payload: {message}")]
    ChunkFormat { message: String },

    #[error("Remote error: HTTP {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio playback error: {message}{}", format_context(.context))]
    Audio {
        message: String,
        context: ErrorContext,
    },

    #[error("Not supported on this runtime: {message}")]
    Unsupported { message: String },

    #[error("Synthesis cancelled")]
    Cancelled,

    #[error("Fallback from '{from}' to '{to}' failed: original error: {original}; fallback error: {fallback}")]
    Fallback {
        from: String,
        to: String,
        original: Box<Error>,
        fallback: Box<Error>,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if let Some(ref engine) = ctx.engine_id {
        parts.push(format!("engine: {}", engine));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::audio_with_context(msg, ErrorContext::new())
    }

    /// Create a new audio playback error with structured context
    pub fn audio_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Audio {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::new())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported {
            message: msg.into(),
        }
    }

    pub fn chunk_format(msg: impl Into<String>) -> Self {
        Error::ChunkFormat {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Audio { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status carried by the error, either directly or through its context.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            Error::Transport(TransportError::Http(e)) => e.status().map(|s| s.as_u16()),
            _ => self.context().and_then(|c| c.status_code),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_rendered_in_display() {
        let err = Error::configuration_with_context(
            "credential missing",
            ErrorContext::new()
                .with_field_path("credential")
                .with_engine("remote"),
        );
        let text = err.to_string();
        assert!(text.contains("credential missing"));
        assert!(text.contains("field: credential"));
        assert!(text.contains("engine: remote"));
    }

    #[test]
    fn aggregate_embeds_both_causes() {
        let err = Error::Fallback {
            from: "remote".into(),
            to: "local".into(),
            original: Box::new(Error::Remote {
                status: 503,
                message: "busy".into(),
                retryable: true,
            }),
            fallback: Box::new(Error::audio("device lost")),
        };
        let text = err.to_string();
        assert!(text.contains("HTTP 503"));
        assert!(text.contains("device lost"));
    }

    #[test]
    fn status_code_comes_from_remote_or_context() {
        let remote = Error::Remote {
            status: 401,
            message: String::new(),
            retryable: false,
        };
        assert_eq!(remote.status_code(), Some(401));

        let runtime =
            Error::runtime_with_context("proxy said no", ErrorContext::new().with_status_code(502));
        assert_eq!(runtime.status_code(), Some(502));
        assert_eq!(Error::Cancelled.status_code(), None);
    }
}
