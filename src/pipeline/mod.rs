// Comment-to-DM pipeline.
//
// webhook event -> keyword match -> dedup gate -> job queue -> worker
//
// `Pipeline` is the producer side shared by every webhook request; the
// worker is spawned once by `start` and owns the consumer side.

pub mod gate;
pub mod keywords;
pub mod queue;
pub mod worker;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::db::DeliveryLog;
use crate::dispatch::rate_limit::RateLimiter;
use crate::dispatch::retry::RetryPolicy;
use crate::dispatch::Dispatcher;
use crate::webhook::CommentEvent;
use gate::{DedupGate, GateDecision};
use keywords::KeywordMatcher;
use queue::{job_queue, JobQueue};
use worker::{DeliveryWorker, WorkerSummary};

/// What happened to one comment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A DM job was enqueued.
    Queued,
    /// No configured keyword in the comment text.
    NoMatch,
    /// The author already has a record for this post.
    Duplicate,
    /// Not enqueued: the queue is shut down or the delivery log failed.
    Dropped,
}

/// Producer-side handle: keyword filter plus dedup gate.
#[derive(Clone)]
pub struct Pipeline {
    matcher: Arc<KeywordMatcher>,
    gate: Arc<DedupGate>,
    queue: JobQueue,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, log: Arc<dyn DeliveryLog>, queue: JobQueue) -> Self {
        Self {
            matcher: Arc::new(KeywordMatcher::new(&config.keywords)),
            gate: Arc::new(DedupGate::new(
                log,
                queue.clone(),
                config.message_template.clone(),
            )),
            queue,
        }
    }

    /// Route one comment through the keyword filter and dedup gate.
    ///
    /// Errors are logged here; webhook handlers only see the decision.
    pub async fn handle_comment(&self, event: &CommentEvent) -> Admission {
        let Some(keyword) = self.matcher.first_match(&event.text) else {
            debug!(comment_id = %event.comment_id, "No keyword in comment");
            return Admission::NoMatch;
        };

        info!(
            comment_id = %event.comment_id,
            post_id = %event.post_id,
            user_id = %event.author_id,
            username = %event.author_username,
            keyword,
            "Keyword matched"
        );

        match self.gate.admit(event).await {
            Ok(GateDecision::Queued) => Admission::Queued,
            Ok(GateDecision::Duplicate) => Admission::Duplicate,
            Ok(GateDecision::Closed) => {
                info!(comment_id = %event.comment_id, "Queue closed, comment dropped");
                Admission::Dropped
            }
            Err(e) => {
                error!(
                    error = %e,
                    comment_id = %event.comment_id,
                    "Delivery log unavailable, comment dropped"
                );
                Admission::Dropped
            }
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn keywords(&self) -> &[String] {
        self.matcher.keywords()
    }
}

/// Wire the queue, spawn the delivery worker and return the producer side.
///
/// The worker stops when `shutdown` is cancelled or every `Pipeline` clone
/// has been dropped.
pub fn start(
    config: &PipelineConfig,
    queue_capacity: usize,
    log: Arc<dyn DeliveryLog>,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: CancellationToken,
) -> (Pipeline, JoinHandle<WorkerSummary>) {
    let (queue, rx) = job_queue(queue_capacity.max(1));
    let pipeline = Pipeline::new(config, log.clone(), queue);
    let mut worker = DeliveryWorker::new(
        rx,
        log,
        dispatcher,
        RetryPolicy::from_config(config),
        config.pre_send_delay,
        shutdown,
    );
    if config.rate_limit_per_hour > 0 {
        worker = worker.with_throttle(RateLimiter::per_hour(config.rate_limit_per_hour));
    }
    (pipeline, worker.spawn())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::sqlite::SqliteDatabase;

    fn config() -> PipelineConfig {
        PipelineConfig {
            keywords: vec!["dm".to_string(), "link".to_string()],
            message_template: "Thanks {username}!".to_string(),
            ..PipelineConfig::default()
        }
    }

    fn comment(author: &str, text: &str) -> CommentEvent {
        CommentEvent {
            comment_id: format!("c-{author}"),
            post_id: "p1".to_string(),
            author_id: author.to_string(),
            author_username: "bob".to_string(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_handle_comment_decisions() {
        let log: Arc<dyn DeliveryLog> = Arc::new(SqliteDatabase::in_memory().unwrap());
        let (queue, _rx) = job_queue(10);
        let pipeline = Pipeline::new(&config(), log, queue);

        assert_eq!(
            pipeline.handle_comment(&comment("1", "nice photo")).await,
            Admission::NoMatch
        );
        assert_eq!(
            pipeline.handle_comment(&comment("1", "please DM")).await,
            Admission::Queued
        );
        assert_eq!(
            pipeline.handle_comment(&comment("1", "send the link")).await,
            Admission::Duplicate
        );
        assert_eq!(pipeline.queue_size(), 1);
        assert_eq!(pipeline.keywords(), &["dm".to_string(), "link".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let log: Arc<dyn DeliveryLog> = Arc::new(SqliteDatabase::in_memory().unwrap());
        let (queue, mut rx) = job_queue(10);
        rx.close();
        let pipeline = Pipeline::new(&config(), log, queue);
        assert_eq!(
            pipeline.handle_comment(&comment("1", "dm me")).await,
            Admission::Dropped
        );
    }
}
