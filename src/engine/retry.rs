//! Retry envelope for upstream calls.
//!
//! Every pricing and listing fetch goes through `with_retry`: a
//! per-call timeout, a small bounded attempt count, and exponential
//! backoff between attempts (1s, 2s, 4s...). In-flight calls are never
//! cancelled — a stalled upstream blocks its step until the timeout
//! elapses.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::ScannerError;

/// Timeout/retry parameters shared by all upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub call_timeout: Duration,
    /// Backoff before the second attempt; doubles each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            call_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// A timed-out attempt is reported as an upstream error against
/// `label`. The error from the final attempt is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ScannerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScannerError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = ScannerError::Upstream {
        api_name: label.to_string(),
        message: "no attempts made".to_string(),
    };

    for attempt in 0..attempts {
        match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    debug!(label, attempt = attempt + 1, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(label, attempt = attempt + 1, error = %e, "Call failed");
                last_error = e;
            }
            Err(_) => {
                warn!(
                    label,
                    attempt = attempt + 1,
                    timeout_secs = policy.call_timeout.as_secs(),
                    "Call timed out"
                );
                last_error = ScannerError::Upstream {
                    api_name: label.to_string(),
                    message: format!("timed out after {:?}", policy.call_timeout),
                };
            }
        }

        if attempt + 1 < attempts {
            let delay = policy.backoff * 2u32.pow(attempt);
            debug!(label, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
