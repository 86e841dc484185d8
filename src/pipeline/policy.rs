//! Per-call timeout, retry and cancellation for remote extraction calls.
//!
//! ## Retry Strategy
//!
//! Only transient transport failures (`AI_API_ERROR`) are retried, with
//! exponential backoff (`backoff * 2^(attempt-1)`). With a 500 ms base and
//! two retries the waits are 500 ms → 1 s. A timeout is not retried: a page
//! that took the whole budget once is likely to do it again, and later pages
//! should not wait on it.

use crate::cancel::CancelToken;
use crate::config::ExtractionConfig;
use crate::error::{PageError, ServiceError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Why a policed call produced no value.
#[derive(Debug)]
pub enum CallError {
    /// The page failed; the run continues.
    Failed(PageError),
    /// The run was cancelled while the call was pending.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.api_timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    /// Run `call` for `page` under the timeout, retry and cancel rules.
    pub async fn run<T, F, Fut>(
        &self,
        page: usize,
        cancel: &CancelToken,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let wait = self.backoff_for(attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page,
                    attempt,
                    self.max_retries,
                    wait.as_millis()
                );
                cancel
                    .guard(tokio::time::sleep(wait))
                    .await
                    .map_err(|_| CallError::Cancelled)?;
            }

            let outcome = cancel
                .guard(tokio::time::timeout(self.timeout, call()))
                .await
                .map_err(|_| CallError::Cancelled)?;

            match outcome {
                Err(_elapsed) => {
                    warn!("Page {}: timed out after {:?}", page, self.timeout);
                    return Err(CallError::Failed(PageError::Timeout {
                        page,
                        secs: self.timeout.as_secs(),
                    }));
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() && attempt < self.max_retries => {
                    warn!("Page {}: attempt {} failed: {}", page, attempt + 1, e);
                    attempt += 1;
                }
                Ok(Err(e)) => {
                    return Err(CallError::Failed(PageError::ExtractionFailed {
                        page,
                        retries: attempt,
                        source: e,
                    }))
                }
            }
        }
    }
}
