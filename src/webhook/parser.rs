// Canonical parser for comment-change webhook bodies.
//
// Body shape:
//   { "object": "instagram",
//     "entry": [ { "id": "...", "time": 0,
//                  "changes": [ { "field": "comments",
//                                 "value": { "id", "media_id", "text",
//                                            "from": { "id", "username" } } } ] } ] }
//
// Only the envelope has to parse for the body to be accepted. Each change's
// `value` is decoded separately, so a non-comment change with a different
// shape (or one broken comment) never discards its siblings.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::CommentEvent;

/// The change field that carries comments.
pub const COMMENTS_FIELD: &str = "comments";

/// The body could not be read as a webhook envelope at all.
#[derive(Debug, Error)]
#[error("malformed webhook payload: {0}")]
pub struct ParseError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CommentValue {
    id: String,
    media_id: String,
    #[serde(default)]
    text: String,
    from: Author,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    #[serde(default)]
    username: String,
}

/// Parse a webhook body into zero or more comment events.
///
/// Errors only when the envelope itself is not valid JSON of the expected
/// shape. Comment changes missing an id, media id or author id are logged
/// and skipped.
pub fn parse_comment_events(
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Vec<CommentEvent>, ParseError> {
    let envelope: Envelope = serde_json::from_slice(body)?;

    let mut events = Vec::new();
    for change in envelope.entry.into_iter().flat_map(|e| e.changes) {
        if change.field != COMMENTS_FIELD {
            debug!(field = %change.field, "Ignoring non-comment change");
            continue;
        }

        let value: CommentValue = match serde_json::from_value(change.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable comment change");
                continue;
            }
        };

        if value.id.is_empty() || value.media_id.is_empty() || value.from.id.is_empty() {
            warn!(
                comment_id = %value.id,
                post_id = %value.media_id,
                "Skipping comment change with missing identifiers"
            );
            continue;
        }

        events.push(CommentEvent {
            comment_id: value.id,
            post_id: value.media_id,
            author_id: value.from.id,
            author_username: value.from.username,
            text: value.text,
            received_at,
        });
    }

    Ok(events)
}
