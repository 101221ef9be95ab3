use std::future::Future;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_RPC_MAX_ATTEMPTS, DEFAULT_RPC_TIMEOUT,
};
use crate::error::{LedgerError, ReconcileError};

/// Deadline and bounded exponential backoff applied to every ledger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RPC_MAX_ATTEMPTS,
            call_timeout: DEFAULT_RPC_TIMEOUT,
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, the ledger rejects it, or attempts run out.
    ///
    /// Timeouts and transport errors are retried; an RPC error response is
    /// returned immediately as [`ReconcileError::LedgerRejected`]. Exhausted
    /// retries surface as [`ReconcileError::RpcUnavailable`].
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(LedgerError::Rejected(msg))) => {
                    tracing::warn!(op, error = %msg, "ledger rejected request");
                    return Err(ReconcileError::LedgerRejected(msg));
                }
                Ok(Err(LedgerError::Transport(msg))) => {
                    tracing::warn!(op, attempt, error = %msg, "ledger call failed");
                    last_error = msg;
                }
                Err(_) => {
                    tracing::warn!(
                        op,
                        attempt,
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "ledger call timed out"
                    );
                    last_error = format!("timed out after {}ms", self.call_timeout.as_millis());
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(ReconcileError::RpcUnavailable(format!(
            "{op}: {last_error} (after {attempts} attempts)"
        )))
    }
}
