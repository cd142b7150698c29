use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AttributePayload, ColumnKind, ColumnValue, IntervalRecord};
use crate::db::{DbError, DbResult};

/// Realm-wide overhead payload: a percentage applied when composing aggregate
/// spend figures. Not consulted for per-event pricing, which uses the markup
/// stored on each cost slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverheadRate {
    pub percentage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OverheadPatch {
    pub percentage: Option<f64>,
}

impl AttributePayload for OverheadRate {
    type Patch = OverheadPatch;

    const KIND: &'static str = "overhead";
    const TABLE: &'static str = "overheads";
    const SUBJECT_COLUMN: Option<&'static str> = None;
    const COLUMNS: &'static [(&'static str, ColumnKind)] =
        &[("percentage", ColumnKind::Float)];

    fn values(&self) -> Vec<ColumnValue> {
        vec![ColumnValue::Float(self.percentage)]
    }

    fn from_values(values: &[ColumnValue]) -> DbResult<Self> {
        match values {
            [percentage] => Ok(Self {
                percentage: percentage.as_float()?,
            }),
            _ => Err(DbError::Internal(
                "overheads row has unexpected payload shape".to_string(),
            )),
        }
    }

    fn patch_values(patch: &OverheadPatch) -> Vec<Option<ColumnValue>> {
        vec![patch.percentage.map(ColumnValue::Float)]
    }

    fn merged(&self, patch: &OverheadPatch) -> Self {
        Self {
            percentage: patch.percentage.unwrap_or(self.percentage),
        }
    }
}

/// An overhead slice as stored.
pub type Overhead = IntervalRecord<OverheadRate>;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOverhead {
    #[validate(range(min = 0.0, max = 100.0))]
    pub percentage: f64,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOverhead {
    #[validate(range(min = 0.0, max = 100.0))]
    pub percentage: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl UpdateOverhead {
    pub fn patch(&self) -> OverheadPatch {
        OverheadPatch {
            percentage: self.percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::AttributeHistory;

    #[test]
    fn history_response_serializes_to_json() {
        let now = Utc::now();
        let slice = Overhead {
            id: Uuid::new_v4(),
            realm_id: "realm-1".to_string(),
            subject_id: None,
            valid_from: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .expect("valid test timestamp")
                .with_timezone(&Utc),
            valid_to: None,
            payload: OverheadRate { percentage: 12.5 },
            created_at: now,
            updated_at: now,
        };
        let history = AttributeHistory {
            current: Some(slice.clone()),
            history: vec![slice],
        };

        let json = serde_json::to_value(&history).expect("History should serialize");
        assert_eq!(json["current"]["payload"]["percentage"], 12.5);
        assert_eq!(json["history"][0]["valid_to"], serde_json::Value::Null);
    }
}
