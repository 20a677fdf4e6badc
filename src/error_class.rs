//! 错误分类：将任意失败归入封闭的六类，驱动重试/回退策略。
//!
//! Failure classification.
//!
//! Every failure that reaches the fallback coordinator is bucketed into one of six
//! classes. The class, not the raw error, decides between a same-engine retry, an
//! engine fallback, or propagation to the caller.
//!
//! | Class            | Typical source                                  | Retry | Fallback |
//! |------------------|-------------------------------------------------|-------|----------|
//! | `network`        | timeouts, refused connections, DNS              | no    | yes      |
//! | `authentication` | HTTP 401/403, rejected or missing credential    | no    | yes      |
//! | `api`            | any other remote error, 429, 5xx                | no    | yes      |
//! | `audio`          | playback device or codec failure                | yes   | after retries |
//! | `system`         | capability unsupported on this runtime          | no    | yes      |
//! | `generic`        | everything else                                 | no    | yes      |
//!
//! ## Example
//!
//! ```rust
//! use tts_relay::ErrorClass;
//!
//! assert_eq!(ErrorClass::from_http_status(401), Some(ErrorClass::Authentication));
//! assert_eq!(ErrorClass::from_http_status(429), Some(ErrorClass::Api));
//! assert!(ErrorClass::Audio.retryable());
//! ```

use crate::transport::TransportError;
use crate::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Closed set of failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Network,
    Authentication,
    Api,
    Audio,
    System,
    Generic,
}

/// Priority-ordered message heuristics; the first matching rule wins.
static MESSAGE_RULES: Lazy<Vec<(ErrorClass, Regex)>> = Lazy::new(|| {
    let rules = [
        (
            ErrorClass::Network,
            r"(?i)timed? ?out|network|connection|connect error|dns|unreachable|offline|failed to fetch",
        ),
        (
            ErrorClass::Authentication,
            r"(?i)unauthori[sz]ed|forbidden|invalid api[ _-]?key|api[ _-]?key|credential|\b40[13]\b",
        ),
        (
            ErrorClass::Api,
            r"(?i)\bapi\b|rate.?limit|quota|throttl|http \d{3}|server error",
        ),
        (
            ErrorClass::Audio,
            r"(?i)audio|playback|decode|codec|device|speaker",
        ),
        (
            ErrorClass::System,
            r"(?i)not supported|unsupported|not available on this",
        ),
    ];
    rules
        .into_iter()
        .filter_map(|(class, pattern)| Regex::new(pattern).ok().map(|re| (class, re)))
        .collect()
});

impl ErrorClass {
    /// Returns the canonical lower-case name (e.g., `"authentication"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Api => "api",
            Self::Audio => "audio",
            Self::System => "system",
            Self::Generic => "generic",
        }
    }

    /// Whether the same engine should be retried before anything else.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Audio)
    }

    /// Whether a failure of this class on a non-terminal engine triggers fallback.
    ///
    /// `Audio` is excluded here; it only falls back once its retries are exhausted.
    #[inline]
    pub fn fallbackable(&self) -> bool {
        !matches!(self, Self::Audio)
    }

    /// Maps a non-2xx HTTP status to a class. Returns `None` for 2xx and 1xx/3xx codes.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(Self::Authentication),
            400..=599 => Some(Self::Api),
            _ => None,
        }
    }

    /// Whether the remote status indicates a transient condition (rate limit or server error).
    pub fn is_transient_status(status: u16) -> bool {
        status == 429 || (500..=599).contains(&status)
    }

    /// Classify a failure.
    ///
    /// Typed variants are mapped directly; untyped errors (runtime, configuration, I/O)
    /// fall back to priority-ordered message matching, then to the status code carried
    /// in their context.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Transport(TransportError::Http(e)) if e.is_timeout() || e.is_connect() => {
                Self::Network
            }
            Error::Transport(TransportError::Http(e)) => e
                .status()
                .and_then(|s| Self::from_http_status(s.as_u16()))
                .unwrap_or(Self::Network),
            Error::Transport(_) => Self::Network,
            Error::Remote { status, .. } => {
                Self::from_http_status(*status).unwrap_or(Self::Api)
            }
            Error::Audio { .. } | Error::ChunkFormat { .. } => Self::Audio,
            Error::Unsupported { .. } => Self::System,
            Error::Fallback { fallback, .. } => Self::classify(fallback),
            other => {
                let message = other.to_string();
                Self::classify_message(&message)
                    .or_else(|| other.status_code().and_then(Self::from_http_status))
                    .unwrap_or(Self::Generic)
            }
        }
    }

    /// Message-only heuristic classification, `None` when no rule matches.
    pub fn classify_message(message: &str) -> Option<Self> {
        MESSAGE_RULES
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(class, _)| *class)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorContext;

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorClass::from_http_status(401), Some(ErrorClass::Authentication));
        assert_eq!(ErrorClass::from_http_status(403), Some(ErrorClass::Authentication));
        assert_eq!(ErrorClass::from_http_status(429), Some(ErrorClass::Api));
        assert_eq!(ErrorClass::from_http_status(500), Some(ErrorClass::Api));
        assert_eq!(ErrorClass::from_http_status(404), Some(ErrorClass::Api));
        assert_eq!(ErrorClass::from_http_status(200), None);
        assert!(ErrorClass::is_transient_status(429));
        assert!(ErrorClass::is_transient_status(503));
        assert!(!ErrorClass::is_transient_status(400));
    }

    #[test]
    fn typed_errors_classify_without_message_matching() {
        let remote = Error::Remote {
            status: 401,
            message: "audio model busy".into(),
            retryable: false,
        };
        assert_eq!(ErrorClass::classify(&remote), ErrorClass::Authentication);

        // Message mentions a timeout, but the typed variant decides.
        let audio = Error::audio("playback timed out");
        assert_eq!(ErrorClass::classify(&audio), ErrorClass::Audio);

        assert_eq!(
            ErrorClass::classify(&Error::unsupported("speech synthesis")),
            ErrorClass::System
        );
        assert_eq!(
            ErrorClass::classify(&Error::Transport(TransportError::Other("reset".into()))),
            ErrorClass::Network
        );
    }

    #[test]
    fn message_rules_are_priority_ordered() {
        // Matches both network and api; network comes first.
        assert_eq!(
            ErrorClass::classify_message("API request timed out"),
            Some(ErrorClass::Network)
        );
        assert_eq!(
            ErrorClass::classify_message("Invalid API key supplied"),
            Some(ErrorClass::Authentication)
        );
        assert_eq!(
            ErrorClass::classify_message("rate limit exceeded"),
            Some(ErrorClass::Api)
        );
        assert_eq!(
            ErrorClass::classify_message("decoder rejected frame"),
            Some(ErrorClass::Audio)
        );
        assert_eq!(
            ErrorClass::classify_message("feature unsupported"),
            Some(ErrorClass::System)
        );
        assert_eq!(ErrorClass::classify_message("something odd"), None);
    }

    #[test]
    fn untyped_errors_fall_back_to_status_then_generic() {
        let with_status =
            Error::runtime_with_context("upstream refused", ErrorContext::new().with_status_code(403));
        assert_eq!(ErrorClass::classify(&with_status), ErrorClass::Authentication);

        let plain = Error::runtime("something odd happened");
        assert_eq!(ErrorClass::classify(&plain), ErrorClass::Generic);

        let missing_key = Error::configuration("remote credential is not configured");
        assert_eq!(ErrorClass::classify(&missing_key), ErrorClass::Authentication);
    }

    #[test]
    fn retry_and_fallback_flags() {
        assert!(ErrorClass::Audio.retryable());
        assert!(!ErrorClass::Audio.fallbackable());
        for class in [
            ErrorClass::Network,
            ErrorClass::Authentication,
            ErrorClass::Api,
            ErrorClass::System,
            ErrorClass::Generic,
        ] {
            assert!(!class.retryable(), "{} should not retry", class);
            assert!(class.fallbackable(), "{} should fall back", class);
        }
    }
}
