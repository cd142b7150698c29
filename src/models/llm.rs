use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A provider/model pair priced within a realm. Rows are created lazily the
/// first time a cost is assigned or usage is tracked; the pair is unique per
/// realm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargeLanguageModel {
    pub id: Uuid,
    pub realm_id: String,
    pub provider_name: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
