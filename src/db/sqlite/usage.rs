use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::common::parse_uuid;
use crate::{
    db::{error::DbResult, repos::UsageRepo},
    models::Usage,
};

pub struct SqliteUsageRepo {
    pool: SqlitePool,
}

impl SqliteUsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_usage(row: &SqliteRow) -> DbResult<Usage> {
        let account_id: Option<String> = row.get("account_id");
        let api_key_id: Option<String> = row.get("api_key_id");

        Ok(Usage {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            realm_id: row.get("realm_id"),
            account_id: account_id.as_deref().map(parse_uuid).transpose()?,
            api_key_id: api_key_id.as_deref().map(parse_uuid).transpose()?,
            llm_cost_id: parse_uuid(&row.get::<String, _>("llm_cost_id"))?,
            input_tokens: row.get("input_tokens"),
            output_tokens: row.get("output_tokens"),
            total_tokens: row.get("total_tokens"),
            total_model_price: row.get("total_model_price"),
            total_price: row.get("total_price"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl UsageRepo for SqliteUsageRepo {
    async fn insert(&self, usage: &Usage) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage (
                id, realm_id, account_id, api_key_id, llm_cost_id,
                input_tokens, output_tokens, total_tokens,
                total_model_price, total_price, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(usage.id.to_string())
        .bind(&usage.realm_id)
        .bind(usage.account_id.map(|u| u.to_string()))
        .bind(usage.api_key_id.map(|u| u.to_string()))
        .bind(usage.llm_cost_id.to_string())
        .bind(usage.input_tokens)
        .bind(usage.output_tokens)
        .bind(usage.total_tokens)
        .bind(usage.total_model_price)
        .bind(usage.total_price)
        .bind(usage.created_at)
        .execute(&self.pool)
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
            WHERE realm_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(realm_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_usage).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    async fn create_test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        sqlx::query(
            r#"
            CREATE TABLE usage (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                account_id TEXT,
                api_key_id TEXT,
                llm_cost_id TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                total_model_price REAL NOT NULL,
                total_price REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create usage table");

        pool
    }

    fn usage_event(realm: &str, total_tokens: i64) -> Usage {
        Usage {
            id: Uuid::new_v4(),
            realm_id: realm.to_string(),
            account_id: Some(Uuid::new_v4()),
            api_key_id: None,
            llm_cost_id: Uuid::new_v4(),
            input_tokens: total_tokens,
            output_tokens: 0,
            total_tokens,
            total_model_price: 0.001,
            total_price: 0.0011,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_list_round_trip() {
        let pool = create_test_pool().await;
        let repo = SqliteUsageRepo::new(pool);

        let event = usage_event("realm-1", 300);
        repo.insert(&event).await.expect("Insert should succeed");
        repo.insert(&usage_event("realm-2", 700))
            .await
            .expect("Insert should succeed");

        let events = repo
            .list_by_realm("realm-1", 10)
            .await
            .expect("List should succeed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
        assert_eq!(events[0].account_id, event.account_id);
        assert_eq!(events[0].llm_cost_id, event.llm_cost_id);
        assert_eq!(events[0].total_tokens, 300);
        assert_eq!(events[0].total_price, 0.0011);
    }

    #[tokio::test]
    async fn list_respects_the_limit() {
        let pool = create_test_pool().await;
        let repo = SqliteUsageRepo::new(pool);

        for _ in 0..5 {
            repo.insert(&usage_event("realm-1", 100))
                .await
                .expect("Insert should succeed");
        }

        let events = repo
            .list_by_realm("realm-1", 3)
            .await
            .expect("List should succeed");
        assert_eq!(events.len(), 3);
    }
}
