use async_trait::async_trait;

use crate::{db::DbResult, models::Account};

/// Store of consumer accounts, keyed by `(realm, external_id)` and created
/// lazily on first tracked usage.
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn get_or_create(&self, realm_id: &str, external_id: &str) -> DbResult<Account>;
}
