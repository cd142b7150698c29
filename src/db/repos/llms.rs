use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::DbResult, models::LargeLanguageModel};

/// Store of priced provider/model pairs. `(realm, provider, model)` is
/// unique; rows are created lazily through the idempotent `get_or_create`.
#[async_trait]
pub trait LlmRepo: Send + Sync {
    /// Fetch the model row, inserting it first if missing. Concurrent calls
    /// for the same pair all resolve to the same row.
    async fn get_or_create(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<LargeLanguageModel>;

    async fn find(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<Option<LargeLanguageModel>>;

    async fn find_by_id(&self, realm_id: &str, id: Uuid)
    -> DbResult<Option<LargeLanguageModel>>;
}
