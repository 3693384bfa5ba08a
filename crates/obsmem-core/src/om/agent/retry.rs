use std::time::Duration;

use serde_json::json;

use crate::error::Result;
use crate::om::config::ResolvedRetryConfig;
use crate::om::sink::{OmEvent, OmEventKind, OmEventSink};

use super::{CompletionModel, CompletionRequest, CompletionResponse};

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl From<ResolvedRetryConfig> for RetryPolicy {
    fn from(config: ResolvedRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (0-based). A server
    /// hint wins over the exponential schedule.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(ms) = retry_after_ms {
            return Duration::from_millis(ms);
        }
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Runs `request` until it succeeds, fails with a non-retryable error or
    /// exhausts `max_attempts`. Only rate limiting is retried.
    pub(crate) fn complete(
        &self,
        model: &dyn CompletionModel,
        request: &CompletionRequest,
        sleeper: &dyn Sleeper,
        sink: &dyn OmEventSink,
        scope_key: &str,
    ) -> Result<CompletionResponse> {
        let mut attempt = 0u32;
        loop {
            match model.complete(request) {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt, err.retry_after_ms());
                    tracing::warn!(
                        scope_key,
                        source = request.source.as_str(),
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "om inference rate limited, backing off"
                    );
                    sink.record(&OmEvent::new(OmEventKind::RateLimitRetry, scope_key).with_detail(
                        json!({
                            "source": request.source.as_str(),
                            "attempt": attempt + 1,
                            "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        }),
                    ));
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
