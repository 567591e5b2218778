// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a (user, post) pair is in its delivery lifecycle.
///
/// `Queued` only exists between admission and the worker's outcome write;
/// finished records are always `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => anyhow::bail!("unknown delivery status {other:?}"),
        }
    }
}

/// One row of the delivery log. At most one exists per (user_id, post_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub user_id: String,
    pub post_id: String,
    pub comment_id: String,
    pub status: DeliveryStatus,
    /// Never decreases across writes.
    pub retry_count: u32,
    pub error_message: Option<String>,
    /// Time of the last write, `YYYY-MM-DD HH:MM:SS` UTC.
    pub sent_at: String,
}

/// The worker's final word on a job, written through `record_outcome`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub user_id: String,
    pub post_id: String,
    pub comment_id: String,
    pub status: DeliveryStatus,
    /// Retries performed by the retry controller (attempts - 1).
    pub retries: u32,
    pub error_message: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent(user_id: &str, post_id: &str, comment_id: &str, retries: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
            status: DeliveryStatus::Sent,
            retries,
            error_message: None,
        }
    }

    pub fn failed(
        user_id: &str,
        post_id: &str,
        comment_id: &str,
        retries: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
            status: DeliveryStatus::Failed,
            retries,
            error_message: Some(error.into()),
        }
    }
}

/// Aggregate delivery counts for the analytics endpoint and `autodm status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total_sent: u64,
    pub total_failed: u64,
    /// Percentage of finished deliveries that were sent (0-100).
    pub success_rate: f64,
    /// Records written in the last 24 hours.
    pub last_24_hours: u64,
    pub top_posts: Vec<PostStat>,
}

impl DeliveryStats {
    /// Percentage of sent over sent + failed, 0 when nothing has finished.
    pub fn compute_success_rate(sent: u64, failed: u64) -> f64 {
        let total = sent + failed;
        if total == 0 {
            0.0
        } else {
            sent as f64 / total as f64 * 100.0
        }
    }
}

/// Number of delivery records for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStat {
    pub post_id: String,
    pub dm_count: u64,
}

/// How many posts the analytics endpoint ranks.
pub const TOP_POSTS_LIMIT: u32 = 5;
