use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A consumer identity within a realm, keyed by the caller-supplied external
/// id. Created lazily on first tracked usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub realm_id: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
