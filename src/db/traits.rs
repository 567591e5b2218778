// Delivery log trait: backend-agnostic async interface for the persistence log.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface. The pipeline only ever
// holds an `Arc<dyn DeliveryLog>`, which is also the seam for test doubles.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{DeliveryOutcome, DeliveryRecord, DeliveryStats};

#[async_trait]
pub trait DeliveryLog: Send + Sync {
    // --- Lifecycle ---

    /// Cheap round-trip to prove the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Deduplication ---

    /// Whether a record exists for (user_id, post_id), whatever its status.
    async fn exists(&self, user_id: &str, post_id: &str) -> Result<bool>;

    /// Atomically insert a `queued` record. True only for the caller that
    /// created it.
    async fn reserve(&self, user_id: &str, post_id: &str, comment_id: &str) -> Result<bool>;

    // --- Outcomes ---

    /// Upsert a delivery outcome keyed on (user_id, post_id).
    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()>;

    /// Fail every leftover `queued` reservation. Returns the number updated.
    async fn abandon_queued(&self, reason: &str) -> Result<usize>;

    // --- Reads ---

    async fn get_delivery(&self, user_id: &str, post_id: &str) -> Result<Option<DeliveryRecord>>;

    /// Most recently written records first.
    async fn get_recent_deliveries(&self, limit: u32) -> Result<Vec<DeliveryRecord>>;

    async fn get_stats(&self) -> Result<DeliveryStats>;
}
