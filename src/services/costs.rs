use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use super::{
    clock::Clock,
    ledger::{DeleteOutcome, VersionedLedger},
};
use crate::{
    db::{DbError, DbPool, DbResult},
    models::{AttributeHistory, CostRates, CreateCost, LlmCost, Scope, UpdateCost},
};

/// Versioned model costs. The priced model row is created lazily on first
/// cost assignment; every ledger operation is scoped to one
/// `(realm, provider, model)` pair.
pub struct CostService {
    db: Arc<DbPool>,
    ledger: VersionedLedger<CostRates>,
}

impl CostService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        let ledger = VersionedLedger::new(db.llm_costs(), clock);
        Self { db, ledger }
    }

    pub async fn create(&self, realm_id: &str, input: CreateCost) -> DbResult<LlmCost> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;

        let llm = self
            .db
            .llms()
            .get_or_create(realm_id, &input.provider_name, &input.model_name)
            .await?;

        let payload = CostRates {
            price_per_unit: input.price_per_unit,
            unit_type: input.unit_type,
            overhead: input.overhead,
        };
        self.ledger
            .create(
                Scope::subject(realm_id, llm.id),
                input.valid_from,
                input.valid_to,
                payload,
            )
            .await
    }

    pub async fn update(&self, realm_id: &str, id: Uuid, input: UpdateCost) -> DbResult<LlmCost> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;
        self.ledger
            .update(realm_id, id, input.valid_from, input.valid_to, input.patch())
            .await
    }

    pub async fn delete(
        &self,
        realm_id: &str,
        id: Uuid,
        reopen_previous: bool,
    ) -> DbResult<DeleteOutcome> {
        self.ledger.delete(realm_id, id, reopen_previous).await
    }

    pub async fn get(&self, realm_id: &str, id: Uuid) -> DbResult<LlmCost> {
        self.ledger.get(realm_id, id).await
    }

    /// The cost in effect at `at` for a provider/model pair, if the pair is
    /// known and has an active slice.
    pub async fn active(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
        at: DateTime<Utc>,
    ) -> DbResult<Option<LlmCost>> {
        let Some(llm) = self.db.llms().find(realm_id, provider_name, model_name).await? else {
            return Ok(None);
        };
        self.ledger
            .resolve_active(&Scope::subject(realm_id, llm.id), at)
            .await
    }

    /// Current cost plus the full timeline for a provider/model pair.
    pub async fn with_history(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
    ) -> DbResult<AttributeHistory<CostRates>> {
        let llm = self
            .db
            .llms()
            .find(realm_id, provider_name, model_name)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "Model {model_name} from {provider_name} not found"
                ))
            })?;
        self.ledger
            .with_history(&Scope::subject(realm_id, llm.id))
            .await
    }
}
