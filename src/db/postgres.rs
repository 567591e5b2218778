// PgDatabase: PostgreSQL backend implementing the DeliveryLog trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - TIMESTAMPTZ instead of TEXT for timestamps (formatted back to text on read)
// - $1/$2 parameter syntax (handled by sqlx)
// - GENERATED ALWAYS AS IDENTITY for auto-increment

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{
    DeliveryOutcome, DeliveryRecord, DeliveryStats, DeliveryStatus, PostStat, TOP_POSTS_LIMIT,
};
use super::traits::DeliveryLog;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

const SELECT_RECORD: &str = "SELECT user_id, post_id, comment_id, status, retry_count, error_message,
        to_char(sent_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS') AS sent_at
 FROM dm_logs";

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// processes starting together don't race to apply the same migration.
    /// The unlock always runs, even if a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "AUTODM" as a big-endian integer.
        const MIGRATION_LOCK_KEY: i64 = 0x4155_544F_444D;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(1, include_str!("../../migrations/postgres/0001_initial.sql"))];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    sqlx_core::query::query("INSERT INTO schema_version (version) VALUES ($1)")
                        .bind(version)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Result<DeliveryRecord> {
    let status: String = row.get(3);
    Ok(DeliveryRecord {
        user_id: row.get(0),
        post_id: row.get(1),
        comment_id: row.get(2),
        status: status.parse::<DeliveryStatus>()?,
        retry_count: row.get::<i32, _>(4).max(0) as u32,
        error_message: row.get(5),
        sent_at: row.get(6),
    })
}

#[async_trait]
impl DeliveryLog for PgDatabase {
    async fn ping(&self) -> Result<()> {
        sqlx_core::query::query("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn exists(&self, user_id: &str, post_id: &str) -> Result<bool> {
        let row = sqlx_core::query::query(
            "SELECT EXISTS(SELECT 1 FROM dm_logs WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn reserve(&self, user_id: &str, post_id: &str, comment_id: &str) -> Result<bool> {
        let result = sqlx_core::query::query(
            "INSERT INTO dm_logs (user_id, post_id, comment_id, status, retry_count, sent_at)
             VALUES ($1, $2, $3, 'queued', 0, NOW())
             ON CONFLICT (user_id, post_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(comment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let retries = i32::try_from(outcome.retries).context("retries exceeds i32 range")?;
        sqlx_core::query::query(
            "INSERT INTO dm_logs (user_id, post_id, comment_id, status, retry_count, error_message, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (user_id, post_id) DO UPDATE SET
                retry_count = dm_logs.retry_count + EXCLUDED.retry_count
                    + CASE WHEN dm_logs.status = 'queued' THEN 0 ELSE 1 END,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                sent_at = NOW()",
        )
        .bind(&outcome.user_id)
        .bind(&outcome.post_id)
        .bind(&outcome.comment_id)
        .bind(outcome.status.as_str())
        .bind(retries)
        .bind(&outcome.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn abandon_queued(&self, reason: &str) -> Result<usize> {
        let result = sqlx_core::query::query(
            "UPDATE dm_logs SET status = 'failed', error_message = $1, sent_at = NOW()
             WHERE status = 'queued'",
        )
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_delivery(&self, user_id: &str, post_id: &str) -> Result<Option<DeliveryRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE user_id = $1 AND post_id = $2");
        let row = sqlx_core::query::query(&sql)
            .bind(user_id)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_recent_deliveries(&self, limit: u32) -> Result<Vec<DeliveryRecord>> {
        let sql = format!("{SELECT_RECORD} ORDER BY dm_logs.sent_at DESC, id DESC LIMIT $1");
        let rows = sqlx_core::query::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn get_stats(&self) -> Result<DeliveryStats> {
        let row = sqlx_core::query::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'sent')::bigint,
                COUNT(*) FILTER (WHERE status = 'failed')::bigint,
                COUNT(*) FILTER (
                    WHERE status IN ('sent', 'failed') AND sent_at > NOW() - INTERVAL '24 hours'
                )::bigint
             FROM dm_logs",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_sent = row.get::<i64, _>(0) as u64;
        let total_failed = row.get::<i64, _>(1) as u64;
        let last_24_hours = row.get::<i64, _>(2) as u64;

        let rows = sqlx_core::query::query(
            "SELECT post_id, COUNT(*)::bigint AS dm_count
             FROM dm_logs
             WHERE status IN ('sent', 'failed')
             GROUP BY post_id
             ORDER BY dm_count DESC, post_id
             LIMIT $1",
        )
        .bind(i64::from(TOP_POSTS_LIMIT))
        .fetch_all(&self.pool)
        .await?;
        let top_posts = rows
            .iter()
            .map(|r| PostStat {
                post_id: r.get(0),
                dm_count: r.get::<i64, _>(1) as u64,
            })
            .collect();

        Ok(DeliveryStats {
            total_sent,
            total_failed,
            success_rate: DeliveryStats::compute_success_rate(total_sent, total_failed),
            last_24_hours,
            top_posts,
        })
    }
}
