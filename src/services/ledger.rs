use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::clock::Clock;
use crate::{
    db::{DbError, DbResult, IntervalRepo},
    models::{AttributeHistory, AttributePayload, IntervalRecord, Scope},
};

/// Last instant of the day before `at`, microsecond resolution.
///
/// Predecessor slices are always closed at a day boundary: a new slice
/// effective on day D ends the previous one at D-1 23:59:59.999999 UTC, so a
/// day's usage is never billed under two configurations.
pub(crate) fn end_of_previous_day(at: DateTime<Utc>) -> DbResult<DateTime<Utc>> {
    let previous_day = at
        .date_naive()
        .pred_opt()
        .ok_or_else(|| DbError::Validation("valid_from is out of range".to_string()))?;
    let end = previous_day
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .ok_or_else(|| DbError::Validation("valid_from is out of range".to_string()))?;
    Ok(end.and_utc())
}

/// Last instant of the day containing `at`, microsecond resolution.
pub(crate) fn end_of_day(at: DateTime<Utc>) -> DbResult<DateTime<Utc>> {
    let end = at
        .date_naive()
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .ok_or_else(|| DbError::Validation("timestamp is out of range".to_string()))?;
    Ok(end.and_utc())
}

/// Outcome of deleting a ledger slice.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The slice had already taken effect, so it was closed at the end of the
    /// current day instead of being removed. History stays intact.
    Closed { valid_to: DateTime<Utc> },
    /// The slice was future-dated and has been removed outright, optionally
    /// reopening the most recent predecessor.
    Removed { reopened: Option<Uuid> },
}

/// Temporal versioning over one attribute kind.
///
/// The same create/update/delete algorithm serves model costs, realm
/// overheads, and bill limits; only the payload type differs. All mutations
/// are delegated to the store's compound operations so each runs in a single
/// transaction.
pub struct VersionedLedger<P: AttributePayload> {
    repo: Arc<dyn IntervalRepo<P>>,
    clock: Arc<dyn Clock>,
}

impl<P: AttributePayload> VersionedLedger<P> {
    pub fn new(repo: Arc<dyn IntervalRepo<P>>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Open a new slice at `valid_from`, closing any slice covering that
    /// instant at the previous day's boundary.
    pub async fn create(
        &self,
        scope: Scope,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
        payload: P,
    ) -> DbResult<IntervalRecord<P>> {
        let valid_from = valid_from.ok_or_else(|| {
            DbError::Validation(format!("valid_from is required for {} entries", P::KIND))
        })?;

        let now = self.clock.now();
        let record = IntervalRecord {
            id: Uuid::new_v4(),
            realm_id: scope.realm_id.clone(),
            subject_id: scope.subject_id,
            valid_from,
            valid_to,
            payload,
            created_at: now,
            updated_at: now,
        };

        let close_at = end_of_previous_day(valid_from)?;
        let closed = self.repo.insert_closing_overlap(&record, close_at).await?;
        if let Some(predecessor) = closed {
            tracing::info!(
                kind = P::KIND,
                realm = %scope.realm_id,
                %predecessor,
                close_at = %close_at,
                "Closed predecessor entry for new validity interval"
            );
        }
        tracing::info!(
            kind = P::KIND,
            realm = %scope.realm_id,
            id = %record.id,
            valid_from = %valid_from,
            "Created ledger entry"
        );
        Ok(record)
    }

    /// Patch a slice. An unchanged `valid_from` updates the payload in place;
    /// a moved `valid_from` closes the slice at the new day boundary and
    /// opens a successor carrying forward every field the patch leaves unset.
    /// Slices whose `valid_to` has already elapsed are immutable.
    pub async fn update(
        &self,
        realm_id: &str,
        id: Uuid,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
        patch: P::Patch,
    ) -> DbResult<IntervalRecord<P>> {
        let target = self
            .repo
            .find_by_id(realm_id, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;

        let valid_from = valid_from.ok_or_else(|| {
            DbError::Validation(format!("valid_from is required for {} entries", P::KIND))
        })?;

        let now = self.clock.now();
        if target.valid_to.is_some_and(|end| end <= now) {
            return Err(DbError::Conflict(format!(
                "{} entry {} has already expired and cannot be changed",
                P::KIND,
                id
            )));
        }

        if valid_from == target.valid_from {
            return self
                .repo
                .update_in_place(realm_id, id, &patch, valid_to, now)
                .await;
        }

        let record = IntervalRecord {
            id: Uuid::new_v4(),
            realm_id: realm_id.to_string(),
            subject_id: target.subject_id,
            valid_from,
            valid_to,
            payload: target.payload.merged(&patch),
            created_at: now,
            updated_at: now,
        };
        let close_at = end_of_previous_day(valid_from)?;
        self.repo.close_and_insert(id, close_at, &record).await?;
        tracing::info!(
            kind = P::KIND,
            realm = %realm_id,
            closed = %id,
            id = %record.id,
            valid_from = %valid_from,
            "Moved ledger entry to a new validity interval"
        );
        Ok(record)
    }

    /// Retire a slice. One that has taken effect is closed at the end of the
    /// current day; a future-dated one is removed outright, optionally
    /// reopening its predecessor.
    pub async fn delete(
        &self,
        realm_id: &str,
        id: Uuid,
        reopen_previous: bool,
    ) -> DbResult<DeleteOutcome> {
        let target = self
            .repo
            .find_by_id(realm_id, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))?;

        let now = self.clock.now();
        if target.valid_to.is_some_and(|end| end <= now) {
            return Err(DbError::Conflict(format!(
                "{} entry {} has already expired and cannot be deleted",
                P::KIND,
                id
            )));
        }

        if target.valid_from <= now {
            let valid_to = end_of_day(now)?;
            self.repo.set_valid_to(realm_id, id, Some(valid_to)).await?;
            tracing::info!(
                kind = P::KIND,
                realm = %realm_id,
                %id,
                valid_to = %valid_to,
                "Closed active ledger entry"
            );
            Ok(DeleteOutcome::Closed { valid_to })
        } else {
            let reopened = self.repo.delete(realm_id, id, reopen_previous).await?;
            tracing::info!(
                kind = P::KIND,
                realm = %realm_id,
                %id,
                reopened = ?reopened,
                "Removed future-dated ledger entry"
            );
            Ok(DeleteOutcome::Removed { reopened })
        }
    }

    /// The slice in effect at `at`, if any.
    pub async fn resolve_active(
        &self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> DbResult<Option<IntervalRecord<P>>> {
        self.repo.find_covering(scope, at).await
    }

    pub async fn get(&self, realm_id: &str, id: Uuid) -> DbResult<IntervalRecord<P>> {
        self.repo
            .find_by_id(realm_id, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} entry {} not found", P::KIND, id)))
    }

    /// Current value plus the full timeline for a scope, newest first.
    pub async fn with_history(&self, scope: &Scope) -> DbResult<AttributeHistory<P>> {
        let current = self.repo.find_covering(scope, self.clock.now()).await?;
        let history = self.repo.list_by_scope(scope).await?;
        Ok(AttributeHistory { current, history })
    }
}
