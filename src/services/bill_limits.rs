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
    models::{
        AttributeHistory, BillLimit, BillLimitAmount, CreateBillLimit, Scope, UpdateBillLimit,
    },
};

/// Versioned realm spending cap. One timeline per realm.
pub struct BillLimitService {
    ledger: VersionedLedger<BillLimitAmount>,
}

impl BillLimitService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: VersionedLedger::new(db.bill_limits(), clock),
        }
    }

    pub async fn create(&self, realm_id: &str, input: CreateBillLimit) -> DbResult<BillLimit> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;
        self.ledger
            .create(
                Scope::realm(realm_id),
                input.valid_from,
                input.valid_to,
                BillLimitAmount {
                    amount: input.amount,
                },
            )
            .await
    }

    pub async fn update(
        &self,
        realm_id: &str,
        id: Uuid,
        input: UpdateBillLimit,
    ) -> DbResult<BillLimit> {
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

    pub async fn get(&self, realm_id: &str, id: Uuid) -> DbResult<BillLimit> {
        self.ledger.get(realm_id, id).await
    }

    pub async fn active(&self, realm_id: &str, at: DateTime<Utc>) -> DbResult<Option<BillLimit>> {
        self.ledger.resolve_active(&Scope::realm(realm_id), at).await
    }

    pub async fn with_history(
        &self,
        realm_id: &str,
    ) -> DbResult<AttributeHistory<BillLimitAmount>> {
        self.ledger.with_history(&Scope::realm(realm_id)).await
    }
}
