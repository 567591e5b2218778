// SqliteDatabase: rusqlite backend implementing the DeliveryLog trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{DeliveryOutcome, DeliveryRecord, DeliveryStats};
use super::traits::DeliveryLog;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// An in-memory database with the schema applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl DeliveryLog for SqliteDatabase {
    async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn exists(&self, user_id: &str, post_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        super::queries::exists(&conn, user_id, post_id)
    }

    async fn reserve(&self, user_id: &str, post_id: &str, comment_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        super::queries::reserve(&conn, user_id, post_id, comment_id)
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::record_outcome(&conn, outcome)
    }

    async fn abandon_queued(&self, reason: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        super::queries::abandon_queued(&conn, reason)
    }

    async fn get_delivery(&self, user_id: &str, post_id: &str) -> Result<Option<DeliveryRecord>> {
        let conn = self.conn.lock().await;
        super::queries::get_delivery(&conn, user_id, post_id)
    }

    async fn get_recent_deliveries(&self, limit: u32) -> Result<Vec<DeliveryRecord>> {
        let conn = self.conn.lock().await;
        super::queries::get_recent_deliveries(&conn, limit)
    }

    async fn get_stats(&self) -> Result<DeliveryStats> {
        let conn = self.conn.lock().await;
        super::queries::get_stats(&conn)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::models::DeliveryStatus;

    #[tokio::test]
    async fn test_trait_ping_and_table_count() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.ping().await.unwrap();
        assert_eq!(db.table_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_trait_outcome_roundtrip() {
        let db = SqliteDatabase::in_memory().unwrap();
        assert!(!db.exists("123", "p1").await.unwrap());
        db.record_outcome(&DeliveryOutcome::sent("123", "p1", "c1", 0))
            .await
            .unwrap();
        assert!(db.exists("123", "p1").await.unwrap());

        let record = db.get_delivery("123", "p1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_trait_concurrent_reserve_has_one_winner() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.reserve("123", "p1", &format!("c{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(db.get_recent_deliveries(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trait_concurrent_outcomes_merge_into_one_row() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.record_outcome(&DeliveryOutcome::failed("u", "p", "c", 0, "x"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let all = db.get_recent_deliveries(10).await.unwrap();
        assert_eq!(all.len(), 1);
        // first write inserts, the other seven merge
        assert_eq!(all[0].retry_count, 7);
    }

    #[tokio::test]
    async fn test_trait_stats() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.record_outcome(&DeliveryOutcome::sent("a", "p", "c", 0))
            .await
            .unwrap();
        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.top_posts.len(), 1);
    }
}
