// Deduplication gate: admits at most one job per (user, post).
//
// Admission is a conditional insert of a `queued` record into the delivery
// log. Only the caller whose insert lands may enqueue, so duplicate webhook
// deliveries racing each other cannot both reach the worker. A prior record
// in any status (queued, sent or failed) blocks admission.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use super::keywords::render_message;
use super::queue::{DispatchJob, JobQueue, QueueClosed};
use crate::db::models::DeliveryOutcome;
use crate::db::DeliveryLog;
use crate::webhook::CommentEvent;

/// Error recorded for a job admitted but never dispatched because the
/// worker shut down first.
pub const ABANDONED_AT_SHUTDOWN: &str = "abandoned: shutdown before dispatch";

/// What the gate did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Queued,
    /// A record already exists for (author, post).
    Duplicate,
    /// The queue was closed for shutdown; the reservation was failed.
    Closed,
}

pub struct DedupGate {
    log: Arc<dyn DeliveryLog>,
    queue: JobQueue,
    message_template: String,
}

impl DedupGate {
    pub fn new(log: Arc<dyn DeliveryLog>, queue: JobQueue, message_template: String) -> Self {
        Self {
            log,
            queue,
            message_template,
        }
    }

    /// Admit a keyword-matched event to the queue unless it is a duplicate.
    ///
    /// Waits for queue space when the queue is full.
    pub async fn admit(&self, event: &CommentEvent) -> Result<GateDecision> {
        // Cheap read first: replays of delivered pairs are the common case
        if self.log.exists(&event.author_id, &event.post_id).await? {
            info!(
                user_id = %event.author_id,
                post_id = %event.post_id,
                "DM already recorded for this user and post, skipping"
            );
            return Ok(GateDecision::Duplicate);
        }

        if !self
            .log
            .reserve(&event.author_id, &event.post_id, &event.comment_id)
            .await?
        {
            info!(
                user_id = %event.author_id,
                post_id = %event.post_id,
                "Lost admission race to a concurrent delivery, skipping"
            );
            return Ok(GateDecision::Duplicate);
        }

        let job = DispatchJob {
            user_id: event.author_id.clone(),
            post_id: event.post_id.clone(),
            comment_id: event.comment_id.clone(),
            message_text: render_message(&self.message_template, &event.author_username),
            username: event.author_username.clone(),
            enqueued_at: Utc::now(),
        };

        match self.queue.push(job).await {
            Ok(()) => {
                info!(
                    user_id = %event.author_id,
                    post_id = %event.post_id,
                    username = %event.author_username,
                    queue_size = self.queue.len(),
                    "DM job queued"
                );
                Ok(GateDecision::Queued)
            }
            Err(QueueClosed(job)) => {
                // The reservation must not stay `queued` forever
                let outcome = DeliveryOutcome::failed(
                    &job.user_id,
                    &job.post_id,
                    &job.comment_id,
                    0,
                    ABANDONED_AT_SHUTDOWN,
                );
                if let Err(e) = self.log.record_outcome(&outcome).await {
                    error!(error = %e, user_id = %job.user_id, post_id = %job.post_id, "Failed to record abandoned job");
                }
                Ok(GateDecision::Closed)
            }
        }
    }
}
