use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    db::{error::DbResult, repos::UsageRepo},
    models::Usage,
};

pub struct PostgresUsageRepo {
    write_pool: PgPool,
    read_pool: Option<PgPool>,
}

impl PostgresUsageRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            write_pool,
            read_pool,
        }
    }

    fn read_pool(&self) -> &PgPool {
        self.read_pool.as_ref().unwrap_or(&self.write_pool)
    }

    fn row_to_usage(row: &PgRow) -> Usage {
        Usage {
            id: row.get("id"),
            realm_id: row.get("realm_id"),
            account_id: row.get("account_id"),
            api_key_id: row.get("api_key_id"),
            llm_cost_id: row.get("llm_cost_id"),
            input_tokens: row.get("input_tokens"),
            output_tokens: row.get("output_tokens"),
            total_tokens: row.get("total_tokens"),
            total_model_price: row.get("total_model_price"),
            total_price: row.get("total_price"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl UsageRepo for PostgresUsageRepo {
    async fn insert(&self, usage: &Usage) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage (
                id, realm_id, account_id, api_key_id, llm_cost_id,
                input_tokens, output_tokens, total_tokens,
                total_model_price, total_price, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(usage.id)
        .bind(&usage.realm_id)
        .bind(usage.account_id)
        .bind(usage.api_key_id)
        .bind(usage.llm_cost_id)
        .bind(usage.input_tokens)
        .bind(usage.output_tokens)
        .bind(usage.total_tokens)
        .bind(usage.total_model_price)
        .bind(usage.total_price)
        .bind(usage.created_at)
        .execute(&self.write_pool)
        .await?;

        Ok(())
    }

    async fn list_by_realm(&self, realm_id: &str, limit: i64) -> DbResult<Vec<Usage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, realm_id, account_id, api_key_id, llm_cost_id,
                   input_tokens, output_tokens, total_tokens,
                   total_model_price, total_price, created_at
            FROM usage
            WHERE realm_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(realm_id)
        .bind(limit)
        .fetch_all(self.read_pool())
        .await?;

        Ok(rows.iter().map(Self::row_to_usage).collect())
    }
}
