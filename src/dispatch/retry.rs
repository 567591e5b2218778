// Retry controller: bounded exponential backoff around a Dispatcher.
//
// Attempt 1 goes out immediately. Retry n (counted from 1) waits
// backoff_base * 2^(n-1): with a 2s base that is 2s, 4s, 8s, ...
//
// By default every error kind is retried the same way. With
// `skip_terminal` set, errors that cannot succeed on retry (see
// DispatchError::is_terminal) end the sequence at once.

use std::time::Duration;

use tracing::{info, warn};

use super::error::DispatchError;
use super::traits::Dispatcher;
use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub skip_terminal: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            skip_terminal: config.skip_terminal_retries,
        }
    }

    /// Delay before retry `retry` (1-based): backoff_base * 2^(retry-1).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

/// How a retry sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Ok on the first successful attempt, else the last error seen.
    pub result: Result<(), DispatchError>,
    /// Attempts made, at least 1.
    pub attempts: u32,
}

impl RetryOutcome {
    /// Retries performed (attempts after the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Send one message, retrying per `policy`. Never cancelled part-way.
pub async fn send_with_retry(
    dispatcher: &dyn Dispatcher,
    policy: &RetryPolicy,
    recipient_id: &str,
    text: &str,
) -> RetryOutcome {
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let backoff = policy.delay_for_retry(attempt);
            info!(
                recipient_id,
                retry = attempt,
                max_retries = policy.max_retries,
                backoff_secs = backoff.as_secs_f64(),
                "Retrying dispatch"
            );
            tokio::time::sleep(backoff).await;
        }
        attempt += 1;

        match dispatcher.send(recipient_id, text).await {
            Ok(()) => {
                return RetryOutcome {
                    result: Ok(()),
                    attempts: attempt,
                }
            }
            Err(err) => {
                warn!(recipient_id, attempt, error = %err, "Dispatch attempt failed");

                let exhausted = attempt > policy.max_retries;
                let give_up_early = policy.skip_terminal && err.is_terminal();
                if exhausted || give_up_early {
                    if give_up_early && !exhausted {
                        info!(recipient_id, "Terminal error, not retrying");
                    }
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
