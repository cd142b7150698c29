use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AttributePayload, ColumnKind, ColumnValue, IntervalRecord};
use crate::db::{DbError, DbResult};

/// Billing unit of a cost entry's `price_per_unit`.
///
/// A closed set: the normalization rule lives here, not in free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Price applies to a single token.
    PerUnit,
    /// Price applies to a block of 1,000 tokens.
    PerThousand,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerUnit => "per_unit",
            Self::PerThousand => "per_thousand",
        }
    }

    pub fn parse(s: &str) -> DbResult<Self> {
        match s {
            "per_unit" => Ok(Self::PerUnit),
            "per_thousand" => Ok(Self::PerThousand),
            other => Err(DbError::Internal(format!(
                "Unknown unit type in database: {other}"
            ))),
        }
    }

    /// Price for a single token under this unit.
    pub fn price_per_token(&self, price_per_unit: f64) -> f64 {
        match self {
            Self::PerUnit => price_per_unit,
            Self::PerThousand => price_per_unit / 1000.0,
        }
    }
}

/// Pricing payload of one cost slice.
///
/// `overhead` is a fractional markup (0.1 = 10%) baked into this model's
/// price, applied on top of the raw model price at usage-tracking time. It is
/// distinct from the realm-level overhead ledger, which is only composed into
/// aggregate reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    pub price_per_unit: f64,
    pub unit_type: UnitType,
    pub overhead: f64,
}

/// Partial update of a cost slice's payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostPatch {
    pub price_per_unit: Option<f64>,
    pub unit_type: Option<UnitType>,
    pub overhead: Option<f64>,
}

impl AttributePayload for CostRates {
    type Patch = CostPatch;

    const KIND: &'static str = "llm cost";
    const TABLE: &'static str = "llm_costs";
    const SUBJECT_COLUMN: Option<&'static str> = Some("llm_id");
    const COLUMNS: &'static [(&'static str, ColumnKind)] = &[
        ("price_per_unit", ColumnKind::Float),
        ("unit_type", ColumnKind::Text),
        ("overhead", ColumnKind::Float),
    ];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Float(self.price_per_unit),
            ColumnValue::Text(self.unit_type.as_str().to_string()),
            ColumnValue::Float(self.overhead),
        ]
    }

    fn from_values(values: &[ColumnValue]) -> DbResult<Self> {
        match values {
            [price, unit, overhead] => Ok(Self {
                price_per_unit: price.as_float()?,
                unit_type: UnitType::parse(unit.as_text()?)?,
                overhead: overhead.as_float()?,
            }),
            _ => Err(DbError::Internal(
                "llm_costs row has unexpected payload shape".to_string(),
            )),
        }
    }

    fn patch_values(patch: &CostPatch) -> Vec<Option<ColumnValue>> {
        vec![
            patch.price_per_unit.map(ColumnValue::Float),
            patch
                .unit_type
                .map(|u| ColumnValue::Text(u.as_str().to_string())),
            patch.overhead.map(ColumnValue::Float),
        ]
    }

    fn merged(&self, patch: &CostPatch) -> Self {
        Self {
            price_per_unit: patch.price_per_unit.unwrap_or(self.price_per_unit),
            unit_type: patch.unit_type.unwrap_or(self.unit_type),
            overhead: patch.overhead.unwrap_or(self.overhead),
        }
    }
}

/// A cost slice as stored.
pub type LlmCost = IntervalRecord<CostRates>;

/// Request to create a cost slice for a provider/model pair. The model row is
/// created lazily if this is the first cost assigned to it.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCost {
    #[validate(length(min = 1, max = 255))]
    pub provider_name: String,
    #[validate(length(min = 1, max = 255))]
    pub model_name: String,
    #[validate(range(min = 0.0))]
    pub price_per_unit: f64,
    pub unit_type: UnitType,
    /// Fractional markup (0.1 = 10%).
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub overhead: f64,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

/// Request to update a cost slice. Omitted payload fields keep their value;
/// a changed `valid_from` splits the slice instead of rewriting history.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCost {
    #[validate(range(min = 0.0))]
    pub price_per_unit: Option<f64>,
    pub unit_type: Option<UnitType>,
    #[validate(range(min = 0.0))]
    pub overhead: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl UpdateCost {
    pub fn patch(&self) -> CostPatch {
        CostPatch {
            price_per_unit: self.price_per_unit,
            unit_type: self.unit_type,
            overhead: self.overhead,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(UnitType::PerUnit, 0.002, 0.002)]
    #[case(UnitType::PerThousand, 0.002, 0.000002)]
    #[case(UnitType::PerThousand, 1.5, 0.0015)]
    fn unit_type_normalizes_price(
        #[case] unit: UnitType,
        #[case] price_per_unit: f64,
        #[case] expected: f64,
    ) {
        assert!((unit.price_per_token(price_per_unit) - expected).abs() < 1e-15);
    }

    #[test]
    fn unit_type_round_trips_through_storage_form() {
        for unit in [UnitType::PerUnit, UnitType::PerThousand] {
            assert_eq!(UnitType::parse(unit.as_str()).unwrap(), unit);
        }
        assert!(UnitType::parse("1K").is_err());
    }

    #[test]
    fn merged_carries_forward_unset_fields() {
        let rates = CostRates {
            price_per_unit: 0.002,
            unit_type: UnitType::PerThousand,
            overhead: 0.1,
        };
        let merged = rates.merged(&CostPatch {
            price_per_unit: Some(0.004),
            ..Default::default()
        });
        assert_eq!(merged.price_per_unit, 0.004);
        assert_eq!(merged.unit_type, UnitType::PerThousand);
        assert_eq!(merged.overhead, 0.1);
    }

    #[test]
    fn payload_round_trips_through_column_values() {
        let rates = CostRates {
            price_per_unit: 0.002,
            unit_type: UnitType::PerUnit,
            overhead: 0.25,
        };
        let decoded = CostRates::from_values(&rates.values()).unwrap();
        assert_eq!(decoded, rates);
    }
}
