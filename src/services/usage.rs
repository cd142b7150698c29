use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use super::{clock::Clock, tokenizer::Tokenizer};
use crate::{
    db::{DbError, DbPool, DbResult},
    models::{Scope, TrackUsage, Usage},
};

/// Prices and records usage events against the cost slice active at the time
/// of the event. Prices are frozen on the row; later ledger changes never
/// restate recorded usage.
pub struct UsageService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl UsageService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            db,
            clock,
            tokenizer,
        }
    }

    /// Record one usage event.
    ///
    /// The model and account rows are created lazily; the event is priced
    /// against the single cost slice covering "now" and rejected with
    /// `NotFound` when no slice is active.
    pub async fn track(&self, realm_id: &str, input: TrackUsage) -> DbResult<Usage> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;

        let now = self.clock.now();

        let llm = self
            .db
            .llms()
            .get_or_create(realm_id, &input.provider_name, &input.model_name)
            .await?;

        let cost = self
            .db
            .llm_costs()
            .find_covering(&Scope::subject(realm_id, llm.id), now)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "No active cost configuration found for {} from {}",
                    input.model_name, input.provider_name
                ))
            })?;

        let account = match input.external_account_id.as_deref() {
            Some(external_id) => Some(
                self.db
                    .accounts()
                    .get_or_create(realm_id, external_id)
                    .await?,
            ),
            None => None,
        };

        let input_tokens = match input.input_tokens {
            Some(count) => count,
            None => {
                let message = input.message.as_deref().ok_or_else(|| {
                    DbError::Validation(
                        "Either input_tokens or a message to tokenize is required".to_string(),
                    )
                })?;
                let count = self
                    .tokenizer
                    .count_tokens(&input.model_name, message)
                    .map_err(|e| {
                        DbError::Validation(format!("Failed to tokenize message: {e}"))
                    })?;
                count as i64
            }
        };
        let output_tokens = input.output_tokens.unwrap_or(0);
        let total_tokens = input_tokens + output_tokens;

        let price_per_token = cost
            .payload
            .unit_type
            .price_per_token(cost.payload.price_per_unit);
        let total_model_price = total_tokens as f64 * price_per_token;
        let total_price = total_model_price * (1.0 + cost.payload.overhead);

        let usage = Usage {
            id: Uuid::new_v4(),
            realm_id: realm_id.to_string(),
            account_id: account.map(|a| a.id),
            api_key_id: input.api_key_id,
            llm_cost_id: cost.id,
            input_tokens,
            output_tokens,
            total_tokens,
            total_model_price,
            total_price,
            created_at: now,
        };
        self.db.usage().insert(&usage).await?;

        tracing::info!(
            realm = %realm_id,
            model = %input.model_name,
            provider = %input.provider_name,
            total_tokens,
            total_price,
            "Tracked usage event"
        );
        Ok(usage)
    }

    /// Most recent events for a realm.
    pub async fn list_recent(&self, realm_id: &str, limit: i64) -> DbResult<Vec<Usage>> {
        self.db.usage().list_by_realm(realm_id, limit).await
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        models::{CreateCost, UnitType},
        services::{clock::ManualClock, costs::CostService, tokenizer::TokenizeError},
    };

    struct StubTokenizer {
        count: usize,
    }

    impl Tokenizer for StubTokenizer {
        fn count_tokens(&self, _model_name: &str, _text: &str) -> Result<usize, TokenizeError> {
            Ok(self.count)
        }
    }

    struct FailingTokenizer;

    impl Tokenizer for FailingTokenizer {
        fn count_tokens(&self, model_name: &str, _text: &str) -> Result<usize, TokenizeError> {
            Err(TokenizeError::UnsupportedModel {
                model: model_name.to_string(),
                reason: "no encoding".to_string(),
            })
        }
    }

    fn ts(s: &str) -> chrono::DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid test timestamp")
            .with_timezone(&Utc)
    }

    async fn create_test_db() -> Arc<DbPool> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        for ddl in [
            r#"
            CREATE TABLE large_language_models (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                model_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (realm_id, provider_name, model_name)
            )
            "#,
            r#"
            CREATE TABLE llm_costs (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                llm_id TEXT NOT NULL,
                price_per_unit REAL NOT NULL,
                unit_type TEXT NOT NULL,
                overhead REAL NOT NULL,
                valid_from TEXT NOT NULL,
                valid_to TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (llm_id, valid_from)
            )
            "#,
            r#"
            CREATE TABLE accounts (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (realm_id, external_id)
            )
            "#,
            r#"
            CREATE TABLE usage (
                id TEXT PRIMARY KEY NOT NULL,
                realm_id TEXT NOT NULL,
                account_id TEXT,
                api_key_id TEXT,
                llm_cost_id TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                total_model_price REAL NOT NULL,
                total_price REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        ] {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .expect("Failed to create table");
        }

        Arc::new(DbPool::from_sqlite(pool))
    }

    async fn seed_cost(db: &Arc<DbPool>, clock: Arc<ManualClock>, overhead: f64) {
        let costs = CostService::new(Arc::clone(db), clock);
        costs
            .create(
                "realm-1",
                CreateCost {
                    provider_name: "openai".to_string(),
                    model_name: "gpt-4".to_string(),
                    price_per_unit: 0.002,
                    unit_type: UnitType::PerThousand,
                    overhead,
                    valid_from: Some(ts("2024-01-01T00:00:00Z")),
                    valid_to: None,
                },
            )
            .await
            .expect("Cost create should succeed");
    }

    fn track_request(message: Option<&str>) -> TrackUsage {
        TrackUsage {
            provider_name: "openai".to_string(),
            model_name: "gpt-4".to_string(),
            message: message.map(str::to_string),
            input_tokens: None,
            output_tokens: None,
            external_account_id: Some("user-42".to_string()),
            api_key_id: None,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test]
    async fn explicit_token_counts_price_deterministically() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.1).await;

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 0 }),
        );
        let mut request = track_request(None);
        request.input_tokens = Some(300);
        request.output_tokens = Some(700);

        let usage = service
            .track("realm-1", request)
            .await
            .expect("Track should succeed");

        assert_eq!(usage.total_tokens, 1000);
        // 1000 tokens at 0.002 per thousand, then a 10% markup.
        assert_close(usage.total_model_price, 0.002);
        assert_close(usage.total_price, 0.0022);
    }

    #[tokio::test]
    async fn tokenized_message_sets_input_tokens_only() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.1).await;

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 300 }),
        );
        let usage = service
            .track("realm-1", track_request(Some("some prompt")))
            .await
            .expect("Track should succeed");

        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.total_tokens, 300);
        assert_close(usage.total_model_price, 0.0006);
        assert_close(usage.total_price, 0.00066);
    }

    #[tokio::test]
    async fn per_unit_cost_skips_normalization() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        let costs = CostService::new(Arc::clone(&db), clock.clone());
        costs
            .create(
                "realm-1",
                CreateCost {
                    provider_name: "openai".to_string(),
                    model_name: "gpt-4".to_string(),
                    price_per_unit: 0.00001,
                    unit_type: UnitType::PerUnit,
                    overhead: 0.0,
                    valid_from: Some(ts("2024-01-01T00:00:00Z")),
                    valid_to: None,
                },
            )
            .await
            .expect("Cost create should succeed");

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 100 }),
        );
        let usage = service
            .track("realm-1", track_request(Some("some prompt")))
            .await
            .expect("Track should succeed");

        assert_close(usage.total_model_price, 0.001);
        assert_close(usage.total_price, 0.001);
    }

    #[tokio::test]
    async fn missing_cost_configuration_is_not_found() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 10 }),
        );
        let result = service.track("realm-1", track_request(Some("hi"))).await;

        match result {
            Err(DbError::NotFound(message)) => {
                assert!(message.contains("gpt-4"));
                assert!(message.contains("openai"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tracking_lazily_creates_the_model_row() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 10 }),
        );
        // Fails for lack of a cost slice, but the model row now exists.
        let _ = service.track("realm-1", track_request(Some("hi"))).await;

        let llm = db
            .llms()
            .find("realm-1", "openai", "gpt-4")
            .await
            .expect("Query should succeed");
        assert!(llm.is_some());
    }

    #[tokio::test]
    async fn tokenizer_failure_is_a_validation_error() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.0).await;

        let service = UsageService::new(Arc::clone(&db), clock, Arc::new(FailingTokenizer));
        let result = service.track("realm-1", track_request(Some("hi"))).await;
        assert!(matches!(result, Err(DbError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_message_and_counts_is_a_validation_error() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.0).await;

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 10 }),
        );
        let result = service.track("realm-1", track_request(None)).await;
        assert!(matches!(result, Err(DbError::Validation(_))));
    }

    #[tokio::test]
    async fn repeated_tracking_reuses_the_same_account() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.0).await;

        let service = UsageService::new(
            Arc::clone(&db),
            clock,
            Arc::new(StubTokenizer { count: 10 }),
        );
        let first = service
            .track("realm-1", track_request(Some("hi")))
            .await
            .expect("Track should succeed");
        let second = service
            .track("realm-1", track_request(Some("hi again")))
            .await
            .expect("Track should succeed");

        assert!(first.account_id.is_some());
        assert_eq!(first.account_id, second.account_id);

        let events = service
            .list_recent("realm-1", 10)
            .await
            .expect("List should succeed");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn event_is_priced_against_the_slice_active_at_its_instant() {
        let db = create_test_db().await;
        let clock = Arc::new(ManualClock::new(ts("2024-02-01T12:00:00Z")));
        seed_cost(&db, clock.clone(), 0.0).await;

        // A second slice takes effect on 2024-03-10.
        let costs = CostService::new(Arc::clone(&db), clock.clone());
        costs
            .create(
                "realm-1",
                CreateCost {
                    provider_name: "openai".to_string(),
                    model_name: "gpt-4".to_string(),
                    price_per_unit: 0.004,
                    unit_type: UnitType::PerThousand,
                    overhead: 0.0,
                    valid_from: Some(ts("2024-03-10T00:00:00Z")),
                    valid_to: None,
                },
            )
            .await
            .expect("Cost create should succeed");

        let service = UsageService::new(
            Arc::clone(&db),
            clock.clone(),
            Arc::new(StubTokenizer { count: 1000 }),
        );

        let before = service
            .track("realm-1", track_request(Some("hi")))
            .await
            .expect("Track should succeed");
        assert_close(before.total_model_price, 0.002);

        clock.set(ts("2024-03-10T08:00:00Z"));
        let after = service
            .track("realm-1", track_request(Some("hi")))
            .await
            .expect("Track should succeed");
        assert_close(after.total_model_price, 0.004);
        assert_ne!(before.llm_cost_id, after.llm_cost_id);
    }
}
