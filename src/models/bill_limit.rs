use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AttributePayload, ColumnKind, ColumnValue, IntervalRecord};
use crate::db::{DbError, DbResult};

/// Spending-cap payload for one realm, in account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillLimitAmount {
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BillLimitPatch {
    pub amount: Option<f64>,
}

impl AttributePayload for BillLimitAmount {
    type Patch = BillLimitPatch;

    const KIND: &'static str = "bill limit";
    const TABLE: &'static str = "bill_limits";
    const SUBJECT_COLUMN: Option<&'static str> = None;
    const COLUMNS: &'static [(&'static str, ColumnKind)] =
        &[("amount", ColumnKind::Float)];

    fn values(&self) -> Vec<ColumnValue> {
        vec![ColumnValue::Float(self.amount)]
    }

    fn from_values(values: &[ColumnValue]) -> DbResult<Self> {
        match values {
            [amount] => Ok(Self {
                amount: amount.as_float()?,
            }),
            _ => Err(DbError::Internal(
                "bill_limits row has unexpected payload shape".to_string(),
            )),
        }
    }

    fn patch_values(patch: &BillLimitPatch) -> Vec<Option<ColumnValue>> {
        vec![patch.amount.map(ColumnValue::Float)]
    }

    fn merged(&self, patch: &BillLimitPatch) -> Self {
        Self {
            amount: patch.amount.unwrap_or(self.amount),
        }
    }
}

/// A bill-limit slice as stored.
pub type BillLimit = IntervalRecord<BillLimitAmount>;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBillLimit {
    #[validate(range(min = 0.0))]
    pub amount: f64,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBillLimit {
    #[validate(range(min = 0.0))]
    pub amount: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl UpdateBillLimit {
    pub fn patch(&self) -> BillLimitPatch {
        BillLimitPatch {
            amount: self.amount,
        }
    }
}
