use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::LlmRepo,
    },
    models::LargeLanguageModel,
};

pub struct SqliteLlmRepo {
    pool: SqlitePool,
}

impl SqliteLlmRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_llm(row: &SqliteRow) -> DbResult<LargeLanguageModel> {
        Ok(LargeLanguageModel {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            realm_id: row.get("realm_id"),
            provider_name: row.get("provider_name"),
            model_name: row.get("model_name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl LlmRepo for SqliteLlmRepo {
    async fn get_or_create(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<LargeLanguageModel> {
        let now = Utc::now();

        // Idempotent: a concurrent insert of the same pair loses the race
        // quietly and the follow-up select returns the winner's row.
        sqlx::query(
            r#"
            INSERT INTO large_language_models (
                id, realm_id, provider_name, model_name, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (realm_id, provider_name, model_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(realm_id)
        .bind(provider_name)
        .bind(model_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find(realm_id, provider_name, model_name)
            .await?
            .ok_or_else(|| {
                DbError::Internal(format!(
                    "Model row for {provider_name}/{model_name} missing after upsert"
                ))
            })
    }

    async fn find(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<Option<LargeLanguageModel>> {
        let row = sqlx::query(
            r#"
            SELECT id, realm_id, provider_name, model_name, created_at, updated_at
            FROM large_language_models
            WHERE realm_id = ? AND provider_name = ? AND model_name = ?
            "#,
        )
        .bind(realm_id)
        .bind(provider_name)
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_llm).transpose()
    }

    async fn find_by_id(
        &self,
        realm_id: &str,
        id: Uuid,
    ) -> DbResult<Option<LargeLanguageModel>> {
        let row = sqlx::query(
            r#"
            SELECT id, realm_id, provider_name, model_name, created_at, updated_at
            FROM large_language_models
            WHERE id = ? AND realm_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(realm_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_llm).transpose()
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
            CREATE TABLE large_language_models (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                model_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (realm_id, provider_name, model_name)
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create large_language_models table");

        pool
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let pool = create_test_pool().await;
        let repo = SqliteLlmRepo::new(pool);

        let first = repo
            .get_or_create("realm-1", "openai", "gpt-4")
            .await
            .expect("First call should succeed");
        let second = repo
            .get_or_create("realm-1", "openai", "gpt-4")
            .await
            .expect("Second call should succeed");

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn same_pair_in_another_realm_is_a_distinct_row() {
        let pool = create_test_pool().await;
        let repo = SqliteLlmRepo::new(pool);

        let a = repo
            .get_or_create("realm-1", "openai", "gpt-4")
            .await
            .expect("Create should succeed");
        let b = repo
            .get_or_create("realm-2", "openai", "gpt-4")
            .await
            .expect("Create should succeed");

        assert_ne!(a.id, b.id);
        assert!(
            repo.find_by_id("realm-2", a.id)
                .await
                .expect("Query should succeed")
                .is_none()
        );
    }
}
