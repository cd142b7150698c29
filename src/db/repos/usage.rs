use async_trait::async_trait;

use crate::{db::DbResult, models::Usage};

/// Append-only store of priced usage events.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    async fn insert(&self, usage: &Usage) -> DbResult<()>;

    /// Most recent events for a realm, `created_at` descending.
    async fn list_by_realm(&self, realm_id: &str, limit: i64) -> DbResult<Vec<Usage>>;
}
