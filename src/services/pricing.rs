use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::{DbPool, DbResult},
    models::{BillLimit, LlmCost, Overhead, Scope},
};

/// Everything priced for a scope at one instant: the single active cost
/// slice, plus the realm-level overhead and bill limit when set.
///
/// Per-event pricing uses only `cost` (including the markup stored on it);
/// `overhead` and `bill_limit` are resolved for reporting call sites, which
/// compose them over aggregated spend.
#[derive(Debug, Clone)]
pub struct ActivePricing {
    pub cost: LlmCost,
    pub overhead: Option<Overhead>,
    pub bill_limit: Option<BillLimit>,
}

/// Point-in-time lookup across the three ledgers.
pub struct PricingResolver {
    db: Arc<DbPool>,
}

impl PricingResolver {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// The single cost slice active for a model at `at`, if any.
    pub async fn active_cost(
        &self,
        realm_id: &str,
        llm_id: Uuid,
        at: DateTime<Utc>,
    ) -> DbResult<Option<LlmCost>> {
        self.db
            .llm_costs()
            .find_covering(&Scope::subject(realm_id, llm_id), at)
            .await
    }

    /// Resolve the full pricing picture for a provider/model pair. `None`
    /// when the pair is unknown or has no active cost.
    pub async fn resolve(
        &self,
        realm_id: &str,
        provider_name: &str,
        model_name: &str,
        at: DateTime<Utc>,
    ) -> DbResult<Option<ActivePricing>> {
        let Some(llm) = self
            .db
            .llms()
            .find(realm_id, provider_name, model_name)
            .await?
        else {
            return Ok(None);
        };
        let Some(cost) = self.active_cost(realm_id, llm.id, at).await? else {
            return Ok(None);
        };

        let realm_scope = Scope::realm(realm_id);
        let overhead = self.db.overheads().find_covering(&realm_scope, at).await?;
        let bill_limit = self.db.bill_limits().find_covering(&realm_scope, at).await?;

        Ok(Some(ActivePricing {
            cost,
            overhead,
            bill_limit,
        }))
    }
}
