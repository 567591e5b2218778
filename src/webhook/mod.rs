// Webhook ingress: turns inbound comment-change notifications into
// CommentEvents and answers the subscription handshake.
//
// There is exactly one parser for the comment payload; the HTTP handlers in
// `web` call it and never look at the JSON themselves.

pub mod parser;
pub mod verify;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A normalized "someone commented on a monitored post" notification.
/// Built once per parsed change entry and dropped after processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentEvent {
    pub comment_id: String,
    /// The media the comment was left on.
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}
