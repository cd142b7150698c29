use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::DbResult,
    models::{AttributePayload, IntervalRecord, Scope},
};

/// Store of validity-interval slices for one versioned-attribute kind.
///
/// One implementation per database serves every attribute kind; the table and
/// payload columns come from [`AttributePayload`]. All lookups are
/// realm-scoped: a row belonging to another realm behaves as if it did not
/// exist.
///
/// The compound mutations each run in a single transaction and re-check the
/// slices they touch inside it, so concurrent ledger writers cannot interleave
/// between check and write.
#[async_trait]
pub trait IntervalRepo<P: AttributePayload>: Send + Sync {
    /// All slices for the scope, `valid_from` descending (newest first).
    async fn list_by_scope(&self, scope: &Scope) -> DbResult<Vec<IntervalRecord<P>>>;

    async fn find_by_id(&self, realm_id: &str, id: Uuid) -> DbResult<Option<IntervalRecord<P>>>;

    /// The slice covering `at`, if any. Finding more than one is an
    /// [`crate::db::DbError::Integrity`] error: the non-overlap invariant is
    /// broken and no winner may be picked.
    async fn find_covering(
        &self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> DbResult<Option<IntervalRecord<P>>>;

    /// The slice with the greatest `valid_from` strictly before `before`,
    /// optionally excluding one id (the slice about to be deleted).
    async fn find_predecessor(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> DbResult<Option<IntervalRecord<P>>>;

    /// Insert `record`, first closing any slice covering `record.valid_from`
    /// at `close_at`. Closing a slice that starts after `close_at` would
    /// invert it, so that case is a `Conflict`; likewise an open-ended
    /// `record` that would swallow a later slice. Returns the id of the
    /// closed predecessor, if one was closed.
    async fn insert_closing_overlap(
        &self,
        record: &IntervalRecord<P>,
        close_at: DateTime<Utc>,
    ) -> DbResult<Option<Uuid>>;

    /// Close the slice `close_id` at `close_at` and insert `record`, as one
    /// transaction. Used when an update moves a slice's effective date: the
    /// old slice expires at the boundary and the new one takes over.
    async fn close_and_insert(
        &self,
        close_id: Uuid,
        close_at: DateTime<Utc>,
        record: &IntervalRecord<P>,
    ) -> DbResult<()>;

    /// Partial payload update that leaves the interval's start untouched.
    /// `valid_to` is applied only when `Some`. The target is re-loaded inside
    /// the transaction: unknown id is `NotFound`, and a slice whose `valid_to`
    /// is at or before `now` is `Conflict` — expired history is immutable even
    /// when a concurrent writer closed the slice after the caller last saw it.
    async fn update_in_place(
        &self,
        realm_id: &str,
        id: Uuid,
        patch: &P::Patch,
        valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DbResult<IntervalRecord<P>>;

    /// Set (or clear, with `None`) a slice's `valid_to`.
    async fn set_valid_to(
        &self,
        realm_id: &str,
        id: Uuid,
        valid_to: Option<DateTime<Utc>>,
    ) -> DbResult<()>;

    /// Hard-delete a slice. With `reopen_previous`, the most recent
    /// predecessor (located inside the same transaction) gets its `valid_to`
    /// cleared so it becomes the open slice again. Returns the reopened
    /// predecessor's id, if any.
    async fn delete(
        &self,
        realm_id: &str,
        id: Uuid,
        reopen_previous: bool,
    ) -> DbResult<Option<Uuid>>;
}
