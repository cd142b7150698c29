use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::IntervalRepo,
    },
    models::{AttributePayload, ColumnKind, ColumnValue, IntervalRecord, Scope},
};

/// Validity-interval store backed by PostgreSQL.
///
/// Mirrors the SQLite implementation; point-in-time reads go to the read
/// replica when one is configured, and the compound mutations take
/// `FOR UPDATE` row locks on the slices they are about to rewrite.
pub struct PostgresIntervalRepo<P> {
    write_pool: PgPool,
    read_pool: Option<PgPool>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: AttributePayload> PostgresIntervalRepo<P> {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            write_pool,
            read_pool,
            _payload: PhantomData,
        }
    }

    fn read_pool(&self) -> &PgPool {
        self.read_pool.as_ref().unwrap_or(&self.write_pool)
    }

    fn select_columns() -> String {
        let mut cols = vec!["id", "realm_id"];
        if let Some(subject) = P::SUBJECT_COLUMN {
            cols.push(subject);
        }
        cols.push("valid_from");
        cols.push("valid_to");
        for (name, _) in P::COLUMNS {
            cols.push(name);
        }
        cols.push("created_at");
        cols.push("updated_at");
        cols.join(", ")
    }

    /// Scope predicate starting at `$1`; returns the clause and the next
    /// free parameter index.
    fn scope_filter() -> (String, usize) {
        match P::SUBJECT_COLUMN {
            Some(subject) => (format!("realm_id = $1 AND {subject} = $2"), 3),
            None => ("realm_id = $1".to_string(), 2),
        }
    }

    fn scope_subject(scope: &Scope) -> DbResult<Option<Uuid>> {
        match P::SUBJECT_COLUMN {
            Some(_) => {
                let subject = scope.subject_id.ok_or_else(|| {
                    DbError::Internal(format!("{} scope requires a subject id", P::KIND))
                })?;
                Ok(Some(subject))
            }
            None => Ok(None),
        }
    }

    fn row_to_record(row: &PgRow) -> DbResult<IntervalRecord<P>> {
        let subject_id = P::SUBJECT_COLUMN.map(|subject| row.get::<Uuid, _>(subject));

        let mut values = Vec::with_capacity(P::COLUMNS.len());
        for (name, kind) in P::COLUMNS {
            values.push(match kind {
                ColumnKind::Float => ColumnValue::Float(row.get::<f64, _>(*name)),
                ColumnKind::Text => ColumnValue::Text(row.get::<String, _>(*name)),
            });
        }

        Ok(IntervalRecord {
            id: row.get("id"),
            realm_id: row.get("realm_id"),
            subject_id,
            valid_from: row.get("valid_from"),
            valid_to: row.get("valid_to"),
            payload: P::from_values(&values)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn covering_on<'c, E>(
        executor: E,
        scope: &Scope,
        at: DateTime<Utc>,
        for_update: bool,
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let (scope_clause, next) = Self::scope_filter();
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope_clause}
              AND valid_from <= ${next}
              AND (valid_to IS NULL OR valid_to > ${next})
            ORDER BY valid_from DESC
            LIMIT 2
            {lock}
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
            lock = if for_update { "FOR UPDATE" } else { "" },
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        let rows = query.bind(at).fetch_all(executor).await?;

        if rows.len() > 1 {
            return Err(DbError::Integrity(format!(
                "Multiple {} entries cover {} for realm {}",
                P::KIND,
                at,
                scope.realm_id
            )));
        }
        rows.first().map(Self::row_to_record).transpose()
    }

    async fn successor_on<'c, E>(
        executor: E,
        scope: &Scope,
        after: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let (scope_clause, next) = Self::scope_filter();
        let exclude_clause = if exclude.is_some() {
            format!("AND id != ${}", next + 1)
        } else {
            String::new()
        };
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope_clause} AND valid_from > ${next} {exclude_clause}
            ORDER BY valid_from ASC
            LIMIT 1
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        query = query.bind(after);
        if let Some(id) = exclude {
            query = query.bind(id);
        }
        let row = query.fetch_optional(executor).await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn check_successor_overlap<'c, E>(
        executor: E,
        record: &IntervalRecord<P>,
        exclude: Option<Uuid>,
    ) -> DbResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let scope = record.scope();
        if let Some(successor) =
            Self::successor_on(executor, &scope, record.valid_from, exclude).await?
        {
            let overlaps = record
                .valid_to
                .is_none_or(|end| end > successor.valid_from);
            if overlaps {
                return Err(DbError::Conflict(format!(
                    "A later {} entry starting at {} overlaps the new validity interval",
                    P::KIND,
                    successor.valid_from
                )));
            }
        }
        Ok(())
    }

    async fn insert_on<'c, E>(executor: E, record: &IntervalRecord<P>) -> DbResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let mut count = 4 + P::COLUMNS.len() + 2;
        if P::SUBJECT_COLUMN.is_some() {
            count += 1;
        }
        let placeholders: Vec<String> = (1..=count).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders})",
            table = P::TABLE,
            columns = Self::select_columns(),
            placeholders = placeholders.join(", "),
        );

        let mut query = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.realm_id.clone());
        if P::SUBJECT_COLUMN.is_some() {
            let subject = record.subject_id.ok_or_else(|| {
                DbError::Internal(format!("{} record requires a subject id", P::KIND))
            })?;
            query = query.bind(subject);
        }
        query = query.bind(record.valid_from).bind(record.valid_to);
        for value in record.payload.values() {
            query = match value {
                ColumnValue::Float(v) => query.bind(v),
                ColumnValue::Text(v) => query.bind(v),
            };
        }
        query = query.bind(record.created_at).bind(record.updated_at);

        query.execute(executor).await.map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!(
                    "A {} entry starting at {} already exists",
                    P::KIND,
                    record.valid_from
                ))
            }
            _ => DbError::from(e),
        })?;
        Ok(())
    }

    async fn fetch_by_id_on<'c, E>(
        executor: E,
        realm_id: &str,
        id: Uuid,
        for_update: bool,
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE id = $1 AND realm_id = $2 {lock}",
            columns = Self::select_columns(),
            table = P::TABLE,
            lock = if for_update { "FOR UPDATE" } else { "" },
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(realm_id)
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn set_valid_to_on<'c, E>(
        executor: E,
        realm_id: &str,
        id: Uuid,
        valid_to: Option<DateTime<Utc>>,
    ) -> DbResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let sql = format!(
            "UPDATE {table} SET valid_to = $1, updated_at = $2 WHERE id = $3 AND realm_id = $4",
            table = P::TABLE,
        );
        let result = sqlx::query(&sql)
            .bind(valid_to)
            .bind(Utc::now())
            .bind(id)
            .bind(realm_id)
            .execute(executor)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("{} entry {} not found", P::KIND, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl<P: AttributePayload> IntervalRepo<P> for PostgresIntervalRepo<P> {
    async fn list_by_scope(&self, scope: &Scope) -> DbResult<Vec<IntervalRecord<P>>> {
        let (scope_clause, _) = Self::scope_filter();
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope_clause}
            ORDER BY valid_from DESC
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        let rows = query.fetch_all(self.read_pool()).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_by_id(&self, realm_id: &str, id: Uuid) -> DbResult<Option<IntervalRecord<P>>> {
        Self::fetch_by_id_on(self.read_pool(), realm_id, id, false).await
    }

    async fn find_covering(
        &self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> DbResult<Option<IntervalRecord<P>>> {
        Self::covering_on(self.read_pool(), scope, at, false).await
    }

    async fn find_predecessor(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> DbResult<Option<IntervalRecord<P>>> {
        let (scope_clause, next) = Self::scope_filter();
        let exclude_clause = if exclude.is_some() {
            format!("AND id != ${}", next + 1)
        } else {
            String::new()
        };
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope_clause} AND valid_from < ${next} {exclude_clause}
            ORDER BY valid_from DESC
            LIMIT 1
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        query = query.bind(before);
        if let Some(id) = exclude {
            query = query.bind(id);
        }
        let row = query.fetch_optional(self.read_pool()).await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert_closing_overlap(
        &self,
        record: &IntervalRecord<P>,
        close_at: DateTime<Utc>,
    ) -> DbResult<Option<Uuid>> {
        let scope = record.scope();
        let mut tx = self.write_pool.begin().await?;

        let covering = Self::covering_on(&mut *tx, &scope, record.valid_from, true).await?;
        let closed = match covering {
            Some(existing) => {
                if close_at < existing.valid_from {
                    return Err(DbError::Conflict(format!(
                        "An existing {} entry already starts on this day ({})",
                        P::KIND,
                        existing.valid_from
                    )));
                }
                Self::set_valid_to_on(&mut *tx, &existing.realm_id, existing.id, Some(close_at))
                    .await?;
                Some(existing.id)
            }
            None => None,
        };

        Self::check_successor_overlap(&mut *tx, record, None).await?;
        Self::insert_on(&mut *tx, record).await?;

        tx.commit().await?;
        Ok(closed)
    }

    async fn close_and_insert(
        &self,
        close_id: Uuid,
        close_at: DateTime<Utc>,
        record: &IntervalRecord<P>,
    ) -> DbResult<()> {
        let mut tx = self.write_pool.begin().await?;

        let target = Self::fetch_by_id_on(&mut *tx, &record.realm_id, close_id, true)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, close_id)))?;
        if close_at < target.valid_from {
            return Err(DbError::Conflict(format!(
                "New effective date would end the {} entry before it starts",
                P::KIND
            )));
        }

        Self::set_valid_to_on(&mut *tx, &record.realm_id, close_id, Some(close_at)).await?;
        Self::check_successor_overlap(&mut *tx, record, Some(close_id)).await?;
        Self::insert_on(&mut *tx, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_in_place(
        &self,
        realm_id: &str,
        id: Uuid,
        patch: &P::Patch,
        valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DbResult<IntervalRecord<P>> {
        let mut tx = self.write_pool.begin().await?;

        // Re-check expiry under the row lock: a concurrent create may have
        // closed the target since the caller last saw it, and closed history
        // stays immutable.
        let target = Self::fetch_by_id_on(&mut *tx, realm_id, id, true)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;
        if target.valid_to.is_some_and(|end| end <= now) {
            return Err(DbError::Conflict(format!(
                "{} entry {} has already expired and cannot be changed",
                P::KIND,
                id
            )));
        }

        let patch_values = P::patch_values(patch);

        let mut sets = Vec::new();
        let mut index = 1;
        for ((name, _), value) in P::COLUMNS.iter().zip(&patch_values) {
            if value.is_some() {
                sets.push(format!("{name} = ${index}"));
                index += 1;
            }
        }
        if valid_to.is_some() {
            sets.push(format!("valid_to = ${index}"));
            index += 1;
        }
        sets.push(format!("updated_at = ${index}"));
        let id_param = index + 1;
        let realm_param = index + 2;

        let sql = format!(
            "UPDATE {table} SET {sets} WHERE id = ${id_param} AND realm_id = ${realm_param}",
            table = P::TABLE,
            sets = sets.join(", "),
        );

        let mut query = sqlx::query(&sql);
        for value in patch_values.into_iter().flatten() {
            query = match value {
                ColumnValue::Float(v) => query.bind(v),
                ColumnValue::Text(v) => query.bind(v),
            };
        }
        if let Some(end) = valid_to {
            query = query.bind(end);
        }
        query
            .bind(Utc::now())
            .bind(id)
            .bind(realm_id)
            .execute(&mut *tx)
            .await?;

        let updated = Self::fetch_by_id_on(&mut *tx, realm_id, id, false)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn set_valid_to(
        &self,
        realm_id: &str,
        id: Uuid,
        valid_to: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        Self::set_valid_to_on(&self.write_pool, realm_id, id, valid_to).await
    }

    async fn delete(
        &self,
        realm_id: &str,
        id: Uuid,
        reopen_previous: bool,
    ) -> DbResult<Option<Uuid>> {
        let mut tx = self.write_pool.begin().await?;

        let target = Self::fetch_by_id_on(&mut *tx, realm_id, id, true)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;

        let sql = format!(
            "DELETE FROM {table} WHERE id = $1 AND realm_id = $2",
            table = P::TABLE,
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(realm_id)
            .execute(&mut *tx)
            .await?;

        let mut reopened = None;
        if reopen_previous {
            let scope = target.scope();
            let (scope_clause, next) = Self::scope_filter();
            let sql = format!(
                r#"
                SELECT {columns}
                FROM {table}
                WHERE {scope_clause} AND valid_from < ${next}
                ORDER BY valid_from DESC
                LIMIT 1
                FOR UPDATE
                "#,
                columns = Self::select_columns(),
                table = P::TABLE,
            );
            let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
            if let Some(subject) = Self::scope_subject(&scope)? {
                query = query.bind(subject);
            }
            let row = query
                .bind(target.valid_from)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(previous) = row.as_ref().map(Self::row_to_record).transpose()? {
                Self::set_valid_to_on(&mut *tx, realm_id, previous.id, None).await?;
                reopened = Some(previous.id);
            }
        }

        tx.commit().await?;
        Ok(reopened)
    }
}
