use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::AccountRepo,
    },
    models::Account,
};

pub struct PostgresAccountRepo {
    write_pool: PgPool,
    #[allow(dead_code)]
    read_pool: Option<PgPool>,
}

impl PostgresAccountRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_account(row: &PgRow) -> Account {
        Account {
            id: row.get("id"),
            realm_id: row.get("realm_id"),
            external_id: row.get("external_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl AccountRepo for PostgresAccountRepo {
    async fn get_or_create(&self, realm_id: &str, external_id: &str) -> DbResult<Account> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, realm_id, external_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (realm_id, external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(realm_id)
        .bind(external_id)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, realm_id, external_id, created_at, updated_at
            FROM accounts
            WHERE realm_id = $1 AND external_id = $2
            "#,
        )
        .bind(realm_id)
        .bind(external_id)
        .fetch_optional(&self.write_pool)
        .await?;

        row.map(|r| Self::row_to_account(&r)).ok_or_else(|| {
            DbError::Internal(format!("Account row for {external_id} missing after upsert"))
        })
    }
}
