// Bounded FIFO job queue between webhook handlers and the delivery worker.
//
// Many producers (one per in-flight webhook request), one consumer. A full
// queue makes `push` wait, so backpressure lands on the webhook response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// One admitted delivery, owned by the queue until the worker takes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchJob {
    /// Recipient: the comment author.
    pub user_id: String,
    pub post_id: String,
    pub comment_id: String,
    /// Template already resolved for this recipient.
    pub message_text: String,
    pub username: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Producer handle. Cheap to clone; every webhook handler gets one.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DispatchJob>,
}

/// Consumer half, handed to the worker.
pub type JobReceiver = mpsc::Receiver<DispatchJob>;

/// The worker has closed the queue; the job was not admitted.
#[derive(Debug)]
pub struct QueueClosed(pub DispatchJob);

/// Create a queue holding at most `capacity` jobs.
pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (JobQueue { tx }, rx)
}

impl JobQueue {
    /// Append a job, waiting for space if the queue is full.
    pub async fn push(&self, job: DispatchJob) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|e| QueueClosed(e.0))
    }

    /// Jobs currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
