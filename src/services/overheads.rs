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
    models::{AttributeHistory, CreateOverhead, Overhead, OverheadRate, Scope, UpdateOverhead},
};

/// Versioned realm-level overhead percentage. One timeline per realm; the
/// value feeds aggregate spend reporting, not per-event pricing.
pub struct OverheadService {
    ledger: VersionedLedger<OverheadRate>,
}

impl OverheadService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: VersionedLedger::new(db.overheads(), clock),
        }
    }

    pub async fn create(&self, realm_id: &str, input: CreateOverhead) -> DbResult<Overhead> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;
        self.ledger
            .create(
                Scope::realm(realm_id),
                input.valid_from,
                input.valid_to,
                OverheadRate {
                    percentage: input.percentage,
                },
            )
            .await
    }

    pub async fn update(
        &self,
        realm_id: &str,
        id: Uuid,
        input: UpdateOverhead,
    ) -> DbResult<Overhead> {
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

    pub async fn get(&self, realm_id: &str, id: Uuid) -> DbResult<Overhead> {
        self.ledger.get(realm_id, id).await
    }

    pub async fn active(&self, realm_id: &str, at: DateTime<Utc>) -> DbResult<Option<Overhead>> {
        self.ledger.resolve_active(&Scope::realm(realm_id), at).await
    }

    pub async fn with_history(&self, realm_id: &str) -> DbResult<AttributeHistory<OverheadRate>> {
        self.ledger.with_history(&Scope::realm(realm_id)).await
    }
}
