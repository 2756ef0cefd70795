//! Watchdog around a single part attempt.
//!
//! Applies the stall timeout and the hard per-attempt timeout to a
//! [`PartTransport`] call, and aborts it on cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use partwise_protocol::constants::{ATTEMPT_TIMEOUT, STALL_TIMEOUT};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{PartTransport, ProgressFn};
use crate::error::TransportError;

/// Timeouts applied to every part attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferLimits {
    /// Seconds without byte progress before an attempt counts as stalled.
    pub stall_timeout_secs: u64,
    /// Hard limit for one attempt, in seconds.
    pub attempt_timeout_secs: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            stall_timeout_secs: STALL_TIMEOUT.as_secs(),
            attempt_timeout_secs: ATTEMPT_TIMEOUT.as_secs(),
        }
    }
}

impl TransferLimits {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Sends one part under the watchdog.
///
/// When several outcomes are ready at the same poll, the precedence is
/// cancellation, then the transfer result, then the hard timeout, then the
/// stall timeout.
pub async fn send_watched(
    transport: &dyn PartTransport,
    url: &str,
    body: Bytes,
    checksum: Option<String>,
    limits: &TransferLimits,
    cancel: &CancellationToken,
    on_progress: ProgressFn,
) -> Result<String, TransportError> {
    let started = Instant::now();
    // Milliseconds since `started` at the latest progress event.
    let last_progress = Arc::new(AtomicU64::new(0));

    let progress: ProgressFn = {
        let last_progress = Arc::clone(&last_progress);
        Arc::new(move |sent| {
            let elapsed = started.elapsed().as_millis() as u64;
            last_progress.fetch_max(elapsed, Ordering::Relaxed);
            on_progress(sent);
        })
    };

    let send = transport.put_part(url, body, checksum, progress);
    let hard = tokio::time::sleep(limits.attempt_timeout());
    let stall = watch_stall(started, last_progress, limits.stall_timeout());
    tokio::pin!(send, hard, stall);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = &mut send => result,
        _ = &mut hard => Err(TransportError::TimedOut),
        _ = &mut stall => Err(TransportError::Stalled),
    }
}

/// Resolves once `stall` has passed without a progress event.
async fn watch_stall(started: Instant, last_progress: Arc<AtomicU64>, stall: Duration) {
    loop {
        let last = Duration::from_millis(last_progress.load(Ordering::Relaxed));
        let deadline = started + last + stall;
        if Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}
