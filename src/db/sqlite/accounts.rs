use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::AccountRepo,
    },
    models::Account,
};

pub struct SqliteAccountRepo {
    pool: SqlitePool,
}

impl SqliteAccountRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: &SqliteRow) -> DbResult<Account> {
        Ok(Account {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            realm_id: row.get("realm_id"),
            external_id: row.get("external_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl AccountRepo for SqliteAccountRepo {
    async fn get_or_create(&self, realm_id: &str, external_id: &str) -> DbResult<Account> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, realm_id, external_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (realm_id, external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(realm_id)
        .bind(external_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, realm_id, external_id, created_at, updated_at
            FROM accounts
            WHERE realm_id = ? AND external_id = ?
            "#,
        )
        .bind(realm_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::row_to_account)
            .transpose()?
            .ok_or_else(|| {
                DbError::Internal(format!("Account row for {external_id} missing after upsert"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        sqlx::query(
            r#"
            CREATE TABLE accounts (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (realm_id, external_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create accounts table");

        pool
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_row() {
        let pool = create_test_pool().await;
        let repo = SqliteAccountRepo::new(pool);

        let first = repo
            .get_or_create("realm-1", "user-42")
            .await
            .expect("First call should succeed");
        let second = repo
            .get_or_create("realm-1", "user-42")
            .await
            .expect("Second call should succeed");

        assert_eq!(first.id, second.id);
        assert_eq!(second.external_id, "user-42");
    }
}
