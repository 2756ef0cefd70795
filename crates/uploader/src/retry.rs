//! Bounded retries with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Retry schedule for part uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for every further retry.
    pub base_delay_ms: u64,
    /// Upper bound of the uniform random jitter added to every delay.
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 800,
            max_jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Total attempts, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }

    /// Delay before retry `retry` (1-based), with jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.max_jitter_ms);
        self.base_delay(retry) + Duration::from_millis(jitter)
    }

    /// Runs `attempt` until it succeeds, fails permanently, or the budget
    /// runs out.
    ///
    /// `attempt` receives the 1-based attempt number. `on_retry` is called
    /// with the failed attempt number, the chosen delay, and the error before
    /// each backoff sleep. Cancellation during an attempt or a sleep returns
    /// [`UploadError::Interrupted`].
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        mut on_retry: R,
        mut attempt: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
        R: FnMut(u32, Duration, &UploadError),
    {
        let mut n = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Interrupted);
            }

            let err = match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if err.is_interruption() || cancel.is_cancelled() {
                return Err(UploadError::Interrupted);
            }
            if !err.is_retriable() || n >= self.max_attempts() {
                return Err(err);
            }

            let delay = self.delay_for_retry(n);
            on_retry(n, delay, &err);

            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
            n += 1;
        }
    }
}
