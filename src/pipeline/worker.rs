// Delivery worker: the single consumer of the job queue.
//
// For each job: wait the pre-send delay, run the retry controller, then
// write exactly one outcome to the delivery log. Jobs are processed one at
// a time in queue order.
//
// Shutdown: cancellation is honoured while idle, during the pre-send delay
// and while waiting on the outbound throttle. A retry sequence that has
// started runs to completion. Jobs still
// queued when the worker stops are recorded as failed so no reservation
// stays `queued`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::gate::ABANDONED_AT_SHUTDOWN;
use super::queue::{DispatchJob, JobReceiver};
use crate::db::models::DeliveryOutcome;
use crate::db::DeliveryLog;
use crate::dispatch::rate_limit::RateLimiter;
use crate::dispatch::retry::{send_with_retry, RetryPolicy};
use crate::dispatch::Dispatcher;

/// Counts reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub delivered: u64,
    pub failed: u64,
    /// Jobs dropped at shutdown without a send attempt.
    pub abandoned: u64,
}

pub struct DeliveryWorker {
    rx: JobReceiver,
    log: Arc<dyn DeliveryLog>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: RetryPolicy,
    pre_send_delay: Duration,
    /// One permit per job. None when the throttle is disabled.
    throttle: Option<RateLimiter>,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    pub fn new(
        rx: JobReceiver,
        log: Arc<dyn DeliveryLog>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: RetryPolicy,
        pre_send_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            log,
            dispatcher,
            policy,
            pre_send_delay,
            throttle: None,
            shutdown,
        }
    }

    /// Pace jobs through `limiter` before each retry sequence.
    pub fn with_throttle(mut self, limiter: RateLimiter) -> Self {
        self.throttle = Some(limiter);
        self
    }

    pub fn spawn(self) -> JoinHandle<WorkerSummary> {
        tokio::spawn(self.run())
    }

    /// Consume jobs until shutdown is requested or every producer is gone.
    pub async fn run(mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!(
            delay_secs = self.pre_send_delay.as_secs_f64(),
            max_retries = self.policy.max_retries,
            "Delivery worker started"
        );

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            if !self.pre_send_delay.is_zero() {
                let cancelled = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => true,
                    _ = tokio::time::sleep(self.pre_send_delay) => false,
                };
                if cancelled {
                    self.abandon(&job).await;
                    summary.abandoned += 1;
                    break;
                }
            }

            if let Some(limiter) = &self.throttle {
                let cancelled = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => true,
                    _ = limiter.acquire() => false,
                };
                if cancelled {
                    self.abandon(&job).await;
                    summary.abandoned += 1;
                    break;
                }
            }

            if self.deliver(&job).await {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }

        // Refuse new jobs, then fail whatever is still buffered
        self.rx.close();
        while let Some(job) = self.rx.recv().await {
            self.abandon(&job).await;
            summary.abandoned += 1;
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "Delivery worker stopped"
        );
        summary
    }

    /// Run one job through the retry controller and record its outcome.
    /// Returns true when the message was sent.
    async fn deliver(&self, job: &DispatchJob) -> bool {
        let outcome = send_with_retry(
            self.dispatcher.as_ref(),
            &self.policy,
            &job.user_id,
            &job.message_text,
        )
        .await;
        let retries = outcome.retries();

        let (record, sent) = match &outcome.result {
            Ok(()) => {
                info!(
                    user_id = %job.user_id,
                    post_id = %job.post_id,
                    username = %job.username,
                    retries,
                    "DM sent"
                );
                (
                    DeliveryOutcome::sent(&job.user_id, &job.post_id, &job.comment_id, retries),
                    true,
                )
            }
            Err(err) => {
                warn!(
                    user_id = %job.user_id,
                    post_id = %job.post_id,
                    attempts = outcome.attempts,
                    error = %err,
                    "DM failed after retries"
                );
                (
                    DeliveryOutcome::failed(
                        &job.user_id,
                        &job.post_id,
                        &job.comment_id,
                        retries,
                        err.to_string(),
                    ),
                    false,
                )
            }
        };

        if let Err(e) = self.log.record_outcome(&record).await {
            error!(
                error = %e,
                user_id = %job.user_id,
                post_id = %job.post_id,
                "Failed to record delivery outcome"
            );
        }
        sent
    }

    async fn abandon(&self, job: &DispatchJob) {
        warn!(
            user_id = %job.user_id,
            post_id = %job.post_id,
            "Abandoning queued DM at shutdown"
        );
        let record = DeliveryOutcome::failed(
            &job.user_id,
            &job.post_id,
            &job.comment_id,
            0,
            ABANDONED_AT_SHUTDOWN,
        );
        if let Err(e) = self.log.record_outcome(&record).await {
            error!(error = %e, user_id = %job.user_id, "Failed to record abandoned job");
        }
    }
}
