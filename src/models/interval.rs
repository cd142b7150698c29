use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{DbError, DbResult};

/// Key under which non-overlapping validity intervals are maintained: the
/// owning realm plus, for model costs, the priced model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub realm_id: String,
    pub subject_id: Option<Uuid>,
}

impl Scope {
    /// Realm-wide scope (overheads, bill limits).
    pub fn realm(realm_id: impl Into<String>) -> Self {
        Self {
            realm_id: realm_id.into(),
            subject_id: None,
        }
    }

    /// Scope narrowed to one priced subject within a realm (model costs).
    pub fn subject(realm_id: impl Into<String>, subject_id: Uuid) -> Self {
        Self {
            realm_id: realm_id.into(),
            subject_id: Some(subject_id),
        }
    }
}

/// Column type of one payload field, declared by [`AttributePayload`] so a
/// single storage implementation can decode any attribute kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Float,
    Text,
}

/// Scalar value of one payload column, used by the storage backends to bind
/// and decode payload fields without knowing the concrete attribute type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Float(f64),
    Text(String),
}

impl ColumnValue {
    pub fn as_float(&self) -> DbResult<f64> {
        match self {
            ColumnValue::Float(v) => Ok(*v),
            ColumnValue::Text(_) => Err(DbError::Internal(
                "Expected numeric payload column, found text".to_string(),
            )),
        }
    }

    pub fn as_text(&self) -> DbResult<&str> {
        match self {
            ColumnValue::Text(v) => Ok(v),
            ColumnValue::Float(_) => Err(DbError::Internal(
                "Expected text payload column, found number".to_string(),
            )),
        }
    }
}

/// Payload of one versioned-attribute kind (model cost, realm overhead, bill
/// limit).
///
/// The associated constants describe the backing table so that one interval
/// store implementation per database serves all three kinds; the methods
/// convert between the payload struct and its column values, and define the
/// carry-forward merge applied when an update moves a slice's effective date.
pub trait AttributePayload: Clone + Send + Sync + 'static {
    /// Partial update; unset fields carry forward from the target slice.
    type Patch: Clone + Send + Sync + 'static;

    /// Attribute kind name used in logs and error messages.
    const KIND: &'static str;

    /// Backing table.
    const TABLE: &'static str;

    /// Foreign-key column tying each slice to a priced subject, if any.
    const SUBJECT_COLUMN: Option<&'static str>;

    /// Payload columns in declaration order.
    const COLUMNS: &'static [(&'static str, ColumnKind)];

    /// Column values aligned with [`Self::COLUMNS`].
    fn values(&self) -> Vec<ColumnValue>;

    /// Rebuild the payload from column values aligned with [`Self::COLUMNS`].
    fn from_values(values: &[ColumnValue]) -> DbResult<Self>;

    /// Values for a partial update, aligned with [`Self::COLUMNS`]; `None`
    /// leaves the column untouched.
    fn patch_values(patch: &Self::Patch) -> Vec<Option<ColumnValue>>;

    /// Full payload carrying forward every field the patch leaves unset.
    fn merged(&self, patch: &Self::Patch) -> Self;
}

/// One time slice of a versioned attribute: a `[valid_from, valid_to)` span
/// with `valid_to = None` meaning open-ended, currently in effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalRecord<P> {
    pub id: Uuid,
    pub realm_id: String,
    /// The priced subject (model) for cost slices; `None` for realm-wide
    /// attributes.
    pub subject_id: Option<Uuid>,
    /// Inclusive start instant, UTC.
    pub valid_from: DateTime<Utc>,
    /// Exclusive end instant, UTC. `None` = open.
    pub valid_to: Option<DateTime<Utc>>,
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<P> IntervalRecord<P> {
    pub fn scope(&self) -> Scope {
        Scope {
            realm_id: self.realm_id.clone(),
            subject_id: self.subject_id,
        }
    }

    /// Whether this slice covers `at` (`valid_from <= at < valid_to`).
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.is_none_or(|end| end > at)
    }

    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// Current value plus the full change history for one scope, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeHistory<P> {
    /// The slice in effect right now, if any (the timeline may consist only
    /// of expired or future-dated slices).
    pub current: Option<IntervalRecord<P>>,
    /// All slices for the scope, `valid_from` descending.
    pub history: Vec<IntervalRecord<P>>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn slice(from: &str, to: Option<&str>) -> IntervalRecord<()> {
        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .expect("valid test timestamp")
                .with_timezone(&Utc)
        };
        IntervalRecord {
            id: Uuid::new_v4(),
            realm_id: "realm-1".to_string(),
            subject_id: None,
            valid_from: parse(from),
            valid_to: to.map(parse),
            payload: (),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn open_slice_covers_everything_after_start() {
        let s = slice("2024-01-01T00:00:00Z", None);
        assert!(s.covers(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(s.covers(Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()));
        assert!(!s.covers(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn closed_slice_end_is_exclusive() {
        let s = slice("2024-01-01T00:00:00Z", Some("2024-02-01T00:00:00Z"));
        assert!(s.covers(Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap()));
        assert!(!s.covers(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
    }
}
