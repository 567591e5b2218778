// Database queries: every read and write of the delivery log.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
// Conflict resolution happens inside single statements (ON CONFLICT), so no
// application-level locking is needed for correctness.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    DeliveryOutcome, DeliveryRecord, DeliveryStats, DeliveryStatus, PostStat, TOP_POSTS_LIMIT,
};

const RECORD_COLUMNS: &str =
    "user_id, post_id, comment_id, status, retry_count, error_message, sent_at";

/// Raw row before the status text is validated.
struct RecordRow {
    user_id: String,
    post_id: String,
    comment_id: String,
    status: String,
    retry_count: u32,
    error_message: Option<String>,
    sent_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            post_id: row.get(1)?,
            comment_id: row.get(2)?,
            status: row.get(3)?,
            retry_count: row.get(4)?,
            error_message: row.get(5)?,
            sent_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<DeliveryRecord> {
        Ok(DeliveryRecord {
            status: self.status.parse::<DeliveryStatus>()?,
            user_id: self.user_id,
            post_id: self.post_id,
            comment_id: self.comment_id,
            retry_count: self.retry_count,
            error_message: self.error_message,
            sent_at: self.sent_at,
        })
    }
}

// --- Deduplication ---

/// Whether any record (in any status) exists for this (user, post).
pub fn exists(conn: &Connection, user_id: &str, post_id: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dm_logs WHERE user_id = ?1 AND post_id = ?2)",
        params![user_id, post_id],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Atomically claim a (user, post) pair by inserting a `queued` record.
///
/// Returns true only if this call created the row. A concurrent or later
/// caller for the same pair gets false and must not enqueue.
pub fn reserve(conn: &Connection, user_id: &str, post_id: &str, comment_id: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO dm_logs (user_id, post_id, comment_id, status, retry_count, sent_at)
         VALUES (?1, ?2, ?3, 'queued', 0, datetime('now'))
         ON CONFLICT(user_id, post_id) DO NOTHING",
        params![user_id, post_id, comment_id],
    )?;
    Ok(inserted == 1)
}

// --- Outcomes ---

/// Upsert the outcome of a delivery keyed on (user_id, post_id).
///
/// Insert: retry_count = retries. Merge onto a queued reservation:
/// retry_count += retries. Merge onto a finished record: retry_count +=
/// 1 + retries. Status, error and timestamp are always overwritten.
pub fn record_outcome(conn: &Connection, outcome: &DeliveryOutcome) -> Result<()> {
    conn.execute(
        "INSERT INTO dm_logs (user_id, post_id, comment_id, status, retry_count, error_message, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(user_id, post_id) DO UPDATE SET
            retry_count = dm_logs.retry_count + excluded.retry_count
                + CASE WHEN dm_logs.status = 'queued' THEN 0 ELSE 1 END,
            status = excluded.status,
            error_message = excluded.error_message,
            sent_at = datetime('now')",
        params![
            outcome.user_id,
            outcome.post_id,
            outcome.comment_id,
            outcome.status.as_str(),
            outcome.retries,
            outcome.error_message,
        ],
    )?;
    Ok(())
}

/// Mark every leftover `queued` reservation as failed with `reason`.
/// Returns how many rows were updated.
pub fn abandon_queued(conn: &Connection, reason: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE dm_logs SET status = 'failed', error_message = ?1, sent_at = datetime('now')
         WHERE status = 'queued'",
        params![reason],
    )?;
    Ok(updated)
}

// --- Reads ---

/// Load the record for one (user, post), if any.
pub fn get_delivery(conn: &Connection, user_id: &str, post_id: &str) -> Result<Option<DeliveryRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM dm_logs WHERE user_id = ?1 AND post_id = ?2");
    let row = conn
        .query_row(&sql, params![user_id, post_id], RecordRow::from_row)
        .optional()?;
    row.map(RecordRow::into_record).transpose()
}

/// Most recently written records first.
pub fn get_recent_deliveries(conn: &Connection, limit: u32) -> Result<Vec<DeliveryRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM dm_logs ORDER BY sent_at DESC, id DESC LIMIT ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit], RecordRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RecordRow::into_record).collect()
}

/// Aggregate counts for analytics. Only finished records count; an
/// in-flight `queued` reservation is not a DM yet.
pub fn get_stats(conn: &Connection) -> Result<DeliveryStats> {
    let count_status = |status: DeliveryStatus| -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dm_logs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    };
    let total_sent = count_status(DeliveryStatus::Sent)?;
    let total_failed = count_status(DeliveryStatus::Failed)?;

    let last_24_hours: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dm_logs
         WHERE status IN ('sent', 'failed') AND sent_at > datetime('now', '-24 hours')",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT post_id, COUNT(*) AS dm_count
         FROM dm_logs
         WHERE status IN ('sent', 'failed')
         GROUP BY post_id
         ORDER BY dm_count DESC, post_id
         LIMIT ?1",
    )?;
    let top_posts = stmt
        .query_map(params![TOP_POSTS_LIMIT], |row| {
            Ok(PostStat {
                post_id: row.get(0)?,
                dm_count: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(DeliveryStats {
        total_sent,
        total_failed,
        success_rate: DeliveryStats::compute_success_rate(total_sent, total_failed),
        last_24_hours: last_24_hours as u64,
        top_posts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn row_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM dm_logs", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_first_outcome_inserts_with_zero_retries() {
        let conn = test_db();
        assert!(!exists(&conn, "123", "p1").unwrap());

        record_outcome(&conn, &DeliveryOutcome::sent("123", "p1", "c1", 0)).unwrap();

        assert!(exists(&conn, "123", "p1").unwrap());
        let record = get_delivery(&conn, "123", "p1").unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.comment_id, "c1");
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_second_outcome_merges_instead_of_inserting() {
        let conn = test_db();
        record_outcome(&conn, &DeliveryOutcome::failed("123", "p1", "c1", 0, "boom")).unwrap();
        record_outcome(&conn, &DeliveryOutcome::sent("123", "p1", "c2", 0)).unwrap();

        assert_eq!(row_count(&conn), 1);
        let record = get_delivery(&conn, "123", "p1").unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.retry_count, 1);
        assert!(record.error_message.is_none());
        // The first comment that triggered the pair is kept
        assert_eq!(record.comment_id, "c1");
    }

    #[test]
    fn test_retry_count_never_decreases() {
        let conn = test_db();
        let mut last = 0;
        for retries in [3, 0, 2, 0] {
            record_outcome(
                &conn,
                &DeliveryOutcome::failed("u", "p", "c", retries, "still failing"),
            )
            .unwrap();
            let count = get_delivery(&conn, "u", "p").unwrap().unwrap().retry_count;
            assert!(count >= last, "retry_count went from {last} to {count}");
            last = count;
        }
        // 3, then +1, then +1+2, then +1
        assert_eq!(last, 8);
        assert_eq!(row_count(&conn), 1);
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let conn = test_db();
        assert!(reserve(&conn, "u", "p", "c1").unwrap());
        assert!(!reserve(&conn, "u", "p", "c2").unwrap());
        assert!(exists(&conn, "u", "p").unwrap());

        let record = get_delivery(&conn, "u", "p").unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Queued);
        assert_eq!(record.comment_id, "c1");
    }

    #[test]
    fn test_reserve_refuses_pair_with_failed_record() {
        let conn = test_db();
        record_outcome(&conn, &DeliveryOutcome::failed("u", "p", "c", 0, "x")).unwrap();
        assert!(!reserve(&conn, "u", "p", "c").unwrap());
    }

    #[test]
    fn test_outcome_on_reservation_does_not_count_as_retry() {
        let conn = test_db();
        reserve(&conn, "u", "p", "c").unwrap();
        record_outcome(&conn, &DeliveryOutcome::failed("u", "p", "c", 3, "window")).unwrap();

        let record = get_delivery(&conn, "u", "p").unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.error_message.as_deref(), Some("window"));
        assert_eq!(row_count(&conn), 1);
    }

    #[test]
    fn test_abandon_queued_only_touches_reservations() {
        let conn = test_db();
        reserve(&conn, "u1", "p", "c").unwrap();
        reserve(&conn, "u2", "p", "c").unwrap();
        record_outcome(&conn, &DeliveryOutcome::sent("u3", "p", "c", 0)).unwrap();

        assert_eq!(abandon_queued(&conn, "abandoned").unwrap(), 2);

        let sent = get_delivery(&conn, "u3", "p").unwrap().unwrap();
        assert_eq!(sent.status, DeliveryStatus::Sent);
        let abandoned = get_delivery(&conn, "u1", "p").unwrap().unwrap();
        assert_eq!(abandoned.status, DeliveryStatus::Failed);
        assert_eq!(abandoned.error_message.as_deref(), Some("abandoned"));
    }

    #[test]
    fn test_recent_deliveries_limit() {
        let conn = test_db();
        for i in 0..5 {
            record_outcome(&conn, &DeliveryOutcome::sent(&format!("u{i}"), "p", "c", 0)).unwrap();
        }
        let recent = get_recent_deliveries(&conn, 3).unwrap();
        assert_eq!(recent.len(), 3);
        // Same-second writes fall back to insertion order, newest first
        assert_eq!(recent[0].user_id, "u4");
    }

    #[test]
    fn test_stats() {
        let conn = test_db();
        record_outcome(&conn, &DeliveryOutcome::sent("u1", "p1", "c", 0)).unwrap();
        record_outcome(&conn, &DeliveryOutcome::sent("u2", "p1", "c", 0)).unwrap();
        record_outcome(&conn, &DeliveryOutcome::sent("u3", "p2", "c", 0)).unwrap();
        record_outcome(&conn, &DeliveryOutcome::failed("u4", "p1", "c", 3, "x")).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total_sent, 3);
        assert_eq!(stats.total_failed, 1);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.last_24_hours, 4);
        assert_eq!(stats.top_posts[0].post_id, "p1");
        assert_eq!(stats.top_posts[0].dm_count, 3);
        assert_eq!(stats.top_posts.len(), 2);
    }

    #[test]
    fn test_stats_skip_reservations() {
        let conn = test_db();
        record_outcome(&conn, &DeliveryOutcome::sent("u1", "p1", "c", 0)).unwrap();
        reserve(&conn, "u2", "p2", "c").unwrap();
        reserve(&conn, "u3", "p2", "c").unwrap();
        reserve(&conn, "u4", "p3", "c").unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.last_24_hours, 1);
        assert_eq!(stats.top_posts.len(), 1);
        assert_eq!(stats.top_posts[0].post_id, "p1");
        assert_eq!(stats.top_posts[0].dm_count, 1);

        // Once abandoned they are finished failures and count as such
        assert_eq!(abandon_queued(&conn, "abandoned").unwrap(), 3);
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total_failed, 3);
        assert_eq!(stats.last_24_hours, 4);
        assert_eq!(stats.top_posts[0].post_id, "p2");
        assert_eq!(stats.top_posts[0].dm_count, 2);
    }

    #[test]
    fn test_stats_empty() {
        let conn = test_db();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats, DeliveryStats::default());
    }
}
