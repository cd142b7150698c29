use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::LlmRepo,
    },
    models::LargeLanguageModel,
};

pub struct PostgresLlmRepo {
    write_pool: PgPool,
    read_pool: Option<PgPool>,
}

impl PostgresLlmRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            write_pool,
            read_pool,
        }
    }

    fn read_pool(&self) -> &PgPool {
        self.read_pool.as_ref().unwrap_or(&self.write_pool)
    }

    fn row_to_llm(row: &PgRow) -> LargeLanguageModel {
        LargeLanguageModel {
            id: row.get("id"),
            realm_id: row.get("realm_id"),
            provider_name: row.get("provider_name"),
            model_name: row.get("model_name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl LlmRepo for PostgresLlmRepo {
    async fn get_or_create(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<LargeLanguageModel> {
        let now = Utc::now();

        // Upsert races resolve to the winner's row; the select always goes to
        // the primary so a fresh insert is visible.
        sqlx::query(
            r#"
            INSERT INTO large_language_models (
                id, realm_id, provider_name, model_name, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (realm_id, provider_name, model_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(realm_id)
        .bind(provider_name)
        .bind(model_name)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, realm_id, provider_name, model_name, created_at, updated_at
            FROM large_language_models
            WHERE realm_id = $1 AND provider_name = $2 AND model_name = $3
            "#,
        )
        .bind(realm_id)
        .bind(provider_name)
        .bind(model_name)
        .fetch_optional(&self.write_pool)
        .await?;

        row.map(|r| Self::row_to_llm(&r)).ok_or_else(|| {
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
            WHERE realm_id = $1 AND provider_name = $2 AND model_name = $3
            "#,
        )
        .bind(realm_id)
        .bind(provider_name)
        .bind(model_name)
        .fetch_optional(self.read_pool())
        .await?;

        Ok(row.map(|r| Self::row_to_llm(&r)))
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
            WHERE id = $1 AND realm_id = $2
            "#,
        )
        .bind(id)
        .bind(realm_id)
        .fetch_optional(self.read_pool())
        .await?;

        Ok(row.map(|r| Self::row_to_llm(&r)))
    }
}
