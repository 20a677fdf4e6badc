use crate::config::FallbackConfig;
use crate::ErrorClass;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fallback,
    Fail,
}

/// Retry / fallback rules.
///
/// - `audio` failures retry the same engine, up to `max_audio_retries` times, waiting
///   `attempt * base_delay` before each retry.
/// - Anything else, and `audio` once its retries are spent, falls back when a next
///   engine exists and fallback is enabled.
/// - Otherwise the failure is final.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub max_audio_retries: u32,
    pub base_delay: Duration,
}

impl FallbackPolicy {
    pub fn from_config(config: &FallbackConfig) -> Self {
        Self {
            max_audio_retries: config.max_audio_retries,
            base_delay: config.base_delay(),
        }
    }

    pub(crate) fn decide(
        &self,
        class: ErrorClass,
        retry_count: u32,
        can_fall_back: bool,
    ) -> Decision {
        let retries_spent = class.retryable() && retry_count >= self.max_audio_retries;
        if class.retryable() && !retries_spent {
            return Decision::Retry {
                delay: self.backoff_delay(retry_count + 1),
            };
        }
        if can_fall_back && (class.fallbackable() || retries_spent) {
            return Decision::Fallback;
        }
        Decision::Fail
    }

    /// Linear backoff: `attempt * base_delay`.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}
