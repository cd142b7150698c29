use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::IntervalRepo,
    },
    models::{AttributePayload, ColumnKind, ColumnValue, IntervalRecord, Scope},
};

/// Validity-interval store backed by SQLite.
///
/// One generic implementation serves every attribute kind: the table name,
/// the optional subject column, and the payload columns all come from
/// [`AttributePayload`], so the temporal SQL is written exactly once.
pub struct SqliteIntervalRepo<P> {
    pool: SqlitePool,
    _payload: PhantomData<fn() -> P>,
}

impl<P: AttributePayload> SqliteIntervalRepo<P> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _payload: PhantomData,
        }
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

    fn scope_filter() -> String {
        match P::SUBJECT_COLUMN {
            Some(subject) => format!("realm_id = ? AND {subject} = ?"),
            None => "realm_id = ?".to_string(),
        }
    }

    fn scope_subject(scope: &Scope) -> DbResult<Option<String>> {
        match P::SUBJECT_COLUMN {
            Some(_) => {
                let subject = scope.subject_id.ok_or_else(|| {
                    DbError::Internal(format!("{} scope requires a subject id", P::KIND))
                })?;
                Ok(Some(subject.to_string()))
            }
            None => Ok(None),
        }
    }

    fn row_to_record(row: &SqliteRow) -> DbResult<IntervalRecord<P>> {
        let subject_id = match P::SUBJECT_COLUMN {
            Some(subject) => Some(parse_uuid(&row.get::<String, _>(subject))?),
            None => None,
        };

        let mut values = Vec::with_capacity(P::COLUMNS.len());
        for (name, kind) in P::COLUMNS {
            values.push(match kind {
                ColumnKind::Float => ColumnValue::Float(row.get::<f64, _>(*name)),
                ColumnKind::Text => ColumnValue::Text(row.get::<String, _>(*name)),
            });
        }

        Ok(IntervalRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            realm_id: row.get("realm_id"),
            subject_id,
            valid_from: row.get("valid_from"),
            valid_to: row.get("valid_to"),
            payload: P::from_values(&values)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// The slice covering `at`, on any executor so transactions can re-check.
    /// Fetches two rows so a broken non-overlap invariant is detected rather
    /// than silently resolved.
    async fn covering_on<'c, E>(
        executor: E,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope}
              AND valid_from <= ?
              AND (valid_to IS NULL OR valid_to > ?)
            ORDER BY valid_from DESC
            LIMIT 2
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
            scope = Self::scope_filter(),
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        let rows = query.bind(at).bind(at).fetch_all(executor).await?;

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

    /// Earliest slice starting strictly after `after`, if any.
    async fn successor_on<'c, E>(
        executor: E,
        scope: &Scope,
        after: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let exclude_clause = if exclude.is_some() { "AND id != ?" } else { "" };
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope} AND valid_from > ? {exclude_clause}
            ORDER BY valid_from ASC
            LIMIT 1
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
            scope = Self::scope_filter(),
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        query = query.bind(after);
        if let Some(id) = exclude {
            query = query.bind(id.to_string());
        }
        let row = query.fetch_optional(executor).await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// Reject a new slice that would swallow a later one.
    async fn check_successor_overlap<'c, E>(
        executor: E,
        record: &IntervalRecord<P>,
        exclude: Option<Uuid>,
    ) -> DbResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
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
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let mut placeholders = vec!["?"; 4 + P::COLUMNS.len() + 2];
        if P::SUBJECT_COLUMN.is_some() {
            placeholders.push("?");
        }
        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders})",
            table = P::TABLE,
            columns = Self::select_columns(),
            placeholders = placeholders.join(", "),
        );

        let mut query = sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(record.realm_id.clone());
        if P::SUBJECT_COLUMN.is_some() {
            let subject = record.subject_id.ok_or_else(|| {
                DbError::Internal(format!("{} record requires a subject id", P::KIND))
            })?;
            query = query.bind(subject.to_string());
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
    ) -> DbResult<Option<IntervalRecord<P>>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE id = ? AND realm_id = ?",
            columns = Self::select_columns(),
            table = P::TABLE,
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
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
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let sql = format!(
            "UPDATE {table} SET valid_to = ?, updated_at = ? WHERE id = ? AND realm_id = ?",
            table = P::TABLE,
        );
        let result = sqlx::query(&sql)
            .bind(valid_to)
            .bind(Utc::now())
            .bind(id.to_string())
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
impl<P: AttributePayload> IntervalRepo<P> for SqliteIntervalRepo<P> {
    async fn list_by_scope(&self, scope: &Scope) -> DbResult<Vec<IntervalRecord<P>>> {
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope}
            ORDER BY valid_from DESC
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
            scope = Self::scope_filter(),
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_by_id(&self, realm_id: &str, id: Uuid) -> DbResult<Option<IntervalRecord<P>>> {
        Self::fetch_by_id_on(&self.pool, realm_id, id).await
    }

    async fn find_covering(
        &self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> DbResult<Option<IntervalRecord<P>>> {
        Self::covering_on(&self.pool, scope, at).await
    }

    async fn find_predecessor(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> DbResult<Option<IntervalRecord<P>>> {
        let exclude_clause = if exclude.is_some() { "AND id != ?" } else { "" };
        let sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {scope} AND valid_from < ? {exclude_clause}
            ORDER BY valid_from DESC
            LIMIT 1
            "#,
            columns = Self::select_columns(),
            table = P::TABLE,
            scope = Self::scope_filter(),
        );

        let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
        if let Some(subject) = Self::scope_subject(scope)? {
            query = query.bind(subject);
        }
        query = query.bind(before);
        if let Some(id) = exclude {
            query = query.bind(id.to_string());
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert_closing_overlap(
        &self,
        record: &IntervalRecord<P>,
        close_at: DateTime<Utc>,
    ) -> DbResult<Option<Uuid>> {
        let scope = record.scope();
        let mut tx = self.pool.begin().await?;

        let covering = Self::covering_on(&mut *tx, &scope, record.valid_from).await?;
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
        let mut tx = self.pool.begin().await?;

        let target = Self::fetch_by_id_on(&mut *tx, &record.realm_id, close_id)
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
        let mut tx = self.pool.begin().await?;

        // Re-check expiry in-tx: a concurrent create may have closed the
        // target since the caller last saw it, and closed history stays
        // immutable.
        let target = Self::fetch_by_id_on(&mut *tx, realm_id, id)
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
        for ((name, _), value) in P::COLUMNS.iter().zip(&patch_values) {
            if value.is_some() {
                sets.push(format!("{name} = ?"));
            }
        }
        if valid_to.is_some() {
            sets.push("valid_to = ?".to_string());
        }
        sets.push("updated_at = ?".to_string());

        let sql = format!(
            "UPDATE {table} SET {sets} WHERE id = ? AND realm_id = ?",
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
            .bind(id.to_string())
            .bind(realm_id)
            .execute(&mut *tx)
            .await?;

        let updated = Self::fetch_by_id_on(&mut *tx, realm_id, id)
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
        Self::set_valid_to_on(&self.pool, realm_id, id, valid_to).await
    }

    async fn delete(
        &self,
        realm_id: &str,
        id: Uuid,
        reopen_previous: bool,
    ) -> DbResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let target = Self::fetch_by_id_on(&mut *tx, realm_id, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;

        let sql = format!("DELETE FROM {table} WHERE id = ? AND realm_id = ?", table = P::TABLE);
        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(realm_id)
            .execute(&mut *tx)
            .await?;

        let mut reopened = None;
        if reopen_previous {
            let scope = target.scope();
            let exclude_clause = "AND id != ?";
            let sql = format!(
                r#"
                SELECT {columns}
                FROM {table}
                WHERE {scope} AND valid_from < ? {exclude_clause}
                ORDER BY valid_from DESC
                LIMIT 1
                "#,
                columns = Self::select_columns(),
                table = P::TABLE,
                scope = Self::scope_filter(),
            );
            let mut query = sqlx::query(&sql).bind(scope.realm_id.clone());
            if let Some(subject) = Self::scope_subject(&scope)? {
                query = query.bind(subject);
            }
            let row = query
                .bind(target.valid_from)
                .bind(id.to_string())
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
