use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// SQLite stores UUIDs as TEXT; a row that fails to parse is corrupted data,
/// not caller error.
pub(crate) fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {e}")))
}
