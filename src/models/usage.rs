use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// One immutable usage fact: token counts and the prices computed from the
/// cost slice that was active when the event was recorded. Prices are frozen
/// at write time; later ledger changes never restate recorded usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub id: Uuid,
    pub realm_id: String,
    pub account_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    /// The cost slice this event was priced against.
    pub llm_cost_id: Uuid,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    /// Raw model price before markup.
    pub total_model_price: f64,
    /// Model price with the cost slice's markup applied.
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

/// Request to record one usage event. Token counts come either from the
/// caller directly or from tokenizing `message`; explicit counts win.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TrackUsage {
    #[validate(length(min = 1, max = 255))]
    pub provider_name: String,
    #[validate(length(min = 1, max = 255))]
    pub model_name: String,
    /// Text to tokenize for the input-token count when no explicit count is
    /// given.
    pub message: Option<String>,
    #[validate(range(min = 0))]
    pub input_tokens: Option<i64>,
    #[validate(range(min = 0))]
    pub output_tokens: Option<i64>,
    /// Caller-side identity; an account row is created lazily for it.
    pub external_account_id: Option<String>,
    pub api_key_id: Option<Uuid>,
}
