//! Storage retry for journal mutations.
//!
//! Shields journal writes from transient storage failures with the same
//! backoff table the delivery policy uses, independently of command-level
//! retries. Fatal failures are returned on the first occurrence.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::journal::StoreResult;
use crate::config::SharedDeliveryConfig;
use crate::error::{RelayError, Result};

/// Floor applied when the configured backoff is zero
const MIN_STORAGE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct StorageRetry {
    config: SharedDeliveryConfig,
    cancel: CancellationToken,
}

impl StorageRetry {
    pub fn new(config: SharedDeliveryConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Run `op` until it succeeds, fails fatally, exhausts the attempt
    /// ceiling, or the subsystem is cancelled.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let cfg = self.config.read().await.clone();
        let max_attempts = cfg.effective_max_retries();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RelayError::Aborted { operation }),
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "journal operation recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(RelayError::Journal {
                    operation,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                return Err(RelayError::JournalExhausted {
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }

            let mut backoff = cfg.backoff_for(attempt);
            if backoff.is_zero() {
                backoff = MIN_STORAGE_BACKOFF;
            }

            warn!(
                operation,
                attempt,
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "journal operation retry"
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => return Err(RelayError::Aborted { operation }),
            }
        }
    }
}
